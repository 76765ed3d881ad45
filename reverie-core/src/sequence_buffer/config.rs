//! Configuration of the sequence replay buffer.
use crate::error::ReplayError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    default::Default,
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration for prioritized sampling.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PerConfig {
    /// Exponent applied to raw priorities. 0 gives uniform sampling over
    /// valid entries.
    pub alpha: f32,

    /// Initial value of the importance sampling exponent.
    pub beta_0: f32,

    /// Final value of the importance sampling exponent. Typically 1.0.
    pub beta_final: f32,

    /// Number of priority updates after which beta reaches its final value.
    pub n_opts_final: usize,

    /// Require all sampled index pairs within a batch to be distinct.
    pub unique: bool,
}

impl Default for PerConfig {
    fn default() -> Self {
        Self {
            alpha: 0.6,
            beta_0: 0.4,
            beta_final: 1.0,
            n_opts_final: 500_000,
            unique: false,
        }
    }
}

impl PerConfig {
    /// Sets the prioritization exponent.
    pub fn alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    /// Sets the initial importance sampling exponent.
    pub fn beta_0(mut self, beta_0: f32) -> Self {
        self.beta_0 = beta_0;
        self
    }

    /// Sets the final importance sampling exponent.
    pub fn beta_final(mut self, beta_final: f32) -> Self {
        self.beta_final = beta_final;
        self
    }

    /// Sets the number of updates over which beta is annealed.
    pub fn n_opts_final(mut self, n_opts_final: usize) -> Self {
        self.n_opts_final = n_opts_final;
        self
    }

    /// Requires sampled index pairs to be distinct within a batch.
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }
}

/// Configuration of [`SequenceReplayBuffer`](super::SequenceReplayBuffer).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct SequenceBufferConfig {
    /// Ring length per environment (number of time slots).
    pub capacity: usize,

    /// Number of parallel environments (the batch axis of the store).
    pub n_envs: usize,

    /// Flattened length of one observation (frame stack) in bytes.
    pub obs_len: usize,

    /// Length of the per-step policy probability vector. 0 disables the
    /// policy column.
    pub policy_len: usize,

    /// Whether a per-step value estimate column is stored.
    pub store_value: bool,

    /// Length of sampled training sequences.
    pub batch_t: usize,

    /// Horizon of n-step returns. Must be at least 1.
    pub n_step: usize,

    /// Discount factor used for n-step returns.
    pub discount: f32,

    /// Stride multiplier applied to sampled time indices when recurrent
    /// state is only refreshed every N steps. 1 disables striding.
    pub rnn_state_interval: usize,

    /// Extra margin of oldest slots treated as unsampleable once the ring
    /// has wrapped, guarding against a writer overwriting a window between
    /// sampling and extraction.
    pub rewrite_guard: usize,

    /// Seed of the sampling random number generators.
    pub seed: u64,

    /// Prioritized sampling parameters. `None` gives uniform sampling.
    pub per_config: Option<PerConfig>,
}

impl Default for SequenceBufferConfig {
    fn default() -> Self {
        Self {
            capacity: 100_000,
            n_envs: 1,
            obs_len: 4 * 84 * 84,
            policy_len: 0,
            store_value: false,
            batch_t: 10,
            n_step: 5,
            discount: 0.99,
            rnn_state_interval: 1,
            rewrite_guard: 0,
            seed: 42,
            per_config: None,
        }
    }
}

impl SequenceBufferConfig {
    /// Sets the ring length per environment.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the number of parallel environments.
    pub fn n_envs(mut self, n_envs: usize) -> Self {
        self.n_envs = n_envs;
        self
    }

    /// Sets the flattened observation length in bytes.
    pub fn obs_len(mut self, obs_len: usize) -> Self {
        self.obs_len = obs_len;
        self
    }

    /// Sets the policy probability vector length.
    pub fn policy_len(mut self, policy_len: usize) -> Self {
        self.policy_len = policy_len;
        self
    }

    /// Enables or disables the value column.
    pub fn store_value(mut self, store_value: bool) -> Self {
        self.store_value = store_value;
        self
    }

    /// Sets the sampled sequence length.
    pub fn batch_t(mut self, batch_t: usize) -> Self {
        self.batch_t = batch_t;
        self
    }

    /// Sets the n-step return horizon.
    pub fn n_step(mut self, n_step: usize) -> Self {
        self.n_step = n_step;
        self
    }

    /// Sets the discount factor.
    pub fn discount(mut self, discount: f32) -> Self {
        self.discount = discount;
        self
    }

    /// Sets the recurrent-state refresh interval.
    pub fn rnn_state_interval(mut self, rnn_state_interval: usize) -> Self {
        self.rnn_state_interval = rnn_state_interval;
        self
    }

    /// Sets the rewrite-guard margin.
    pub fn rewrite_guard(mut self, rewrite_guard: usize) -> Self {
        self.rewrite_guard = rewrite_guard;
        self
    }

    /// Sets the sampling seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the prioritized sampling parameters.
    pub fn per_config(mut self, per_config: Option<PerConfig>) -> Self {
        self.per_config = per_config;
        self
    }

    /// Number of consecutive records a sampled window spans.
    ///
    /// Base fields need `batch_t` steps, value/policy targets one step past
    /// the n-step lookahead.
    pub fn window_len(&self) -> usize {
        self.batch_t + self.n_step + 1
    }

    /// Checks internal consistency of the configuration.
    pub fn validate(&self) -> Result<(), ReplayError> {
        if self.capacity == 0 || self.n_envs == 0 || self.obs_len == 0 {
            return Err(ReplayError::OutOfRange(
                "capacity, n_envs and obs_len must be positive".into(),
            ));
        }
        if self.batch_t == 0 || self.n_step == 0 {
            return Err(ReplayError::OutOfRange(
                "batch_t and n_step must be at least 1".into(),
            ));
        }
        if self.window_len() + self.rewrite_guard > self.capacity {
            return Err(ReplayError::OutOfRange(format!(
                "window of {} steps plus guard of {} exceeds capacity {}",
                self.window_len(),
                self.rewrite_guard,
                self.capacity,
            )));
        }
        if self.rnn_state_interval == 0 || self.capacity % self.rnn_state_interval != 0 {
            return Err(ReplayError::OutOfRange(format!(
                "capacity {} is not a multiple of rnn_state_interval {}",
                self.capacity, self.rnn_state_interval,
            )));
        }
        Ok(())
    }

    /// Loads the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves the configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{PerConfig, SequenceBufferConfig};
    use tempdir::TempDir;

    #[test]
    fn test_config_roundtrip() {
        let dir = TempDir::new("seq_buffer_config").unwrap();
        let path = dir.path().join("config.yaml");

        let config = SequenceBufferConfig::default()
            .capacity(1000)
            .n_envs(4)
            .batch_t(6)
            .n_step(3)
            .per_config(Some(PerConfig::default().alpha(0.5).unique(true)));
        config.save(&path).unwrap();

        let loaded = SequenceBufferConfig::load(&path).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_validate_rejects_oversized_window() {
        let config = SequenceBufferConfig::default()
            .capacity(10)
            .batch_t(8)
            .n_step(5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_misaligned_interval() {
        let config = SequenceBufferConfig::default()
            .capacity(100)
            .rnn_state_interval(3);
        assert!(config.validate().is_err());
    }
}
