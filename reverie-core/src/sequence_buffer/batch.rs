//! Transition records and sampled sequence batches.

/// One timestep of every parallel environment, as produced by the
/// interaction loop.
///
/// This is the single canonical record type of the engine: optional columns
/// (policy probabilities, value estimates) are selected at buffer
/// construction rather than by extending the record per use site. All
/// per-environment fields are laid out contiguously, `obs` as
/// `[n_envs, obs_len]` and `policy` as `[n_envs, policy_len]`.
#[derive(Debug, Clone)]
pub struct StepBatch {
    /// Frame-stack observations, flattened over environments.
    pub obs: Vec<u8>,

    /// Discrete actions, one per environment.
    pub act: Vec<i64>,

    /// Rewards, one per environment.
    pub reward: Vec<f32>,

    /// Episode termination flags, one per environment. A set flag marks the
    /// last valid record of its episode.
    pub done: Vec<i8>,

    /// Policy probability vectors, flattened over environments.
    pub policy: Option<Vec<f32>>,

    /// Value estimates, one per environment.
    pub value: Option<Vec<f32>>,
}

impl StepBatch {
    /// Creates a step record without the optional columns.
    pub fn new(obs: Vec<u8>, act: Vec<i64>, reward: Vec<f32>, done: Vec<i8>) -> Self {
        Self {
            obs,
            act,
            reward,
            done,
            policy: None,
            value: None,
        }
    }

    /// Attaches policy probability vectors.
    pub fn with_policy(mut self, policy: Vec<f32>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Attaches value estimates.
    pub fn with_value(mut self, value: Vec<f32>) -> Self {
        self.value = Some(value);
        self
    }

    /// Number of environments covered by this record.
    pub fn n_envs(&self) -> usize {
        self.act.len()
    }
}

/// A batch of sampled sequences, shaped `[time, batch]` per field.
///
/// Base fields (`obs`, `act`, `reward`, and the optional `value`/`policy`
/// columns) span `rows_full = batch_t + n_step + 1` rows: the nominal
/// training window plus the lookahead needed for bootstrapped n-step
/// targets. Derived fields (`done`, `done_n`, `return_n`) span `batch_t`
/// rows. Flat storage is time-major: element `(row, col)` of a scalar field
/// lives at `row * batch_b + col`.
///
/// Constructed fresh per sample call and consumed by the training step.
#[derive(Debug, Clone)]
pub struct SequenceBatch {
    /// Observations, `[rows_full, batch_b, obs_len]`.
    pub obs: Vec<u8>,

    /// Actions, `[rows_full, batch_b]`.
    pub act: Vec<i64>,

    /// Rewards, `[rows_full, batch_b]`.
    pub reward: Vec<f32>,

    /// Termination flags over the nominal window, `[batch_t, batch_b]`.
    pub done: Vec<i8>,

    /// Whether a terminal occurs within the n-step lookahead,
    /// `[batch_t, batch_b]`.
    pub done_n: Vec<i8>,

    /// Discounted n-step returns, `[batch_t, batch_b]`.
    pub return_n: Vec<f32>,

    /// Value estimates, `[rows_full, batch_b]`; empty when the buffer does
    /// not store values.
    pub value: Vec<f32>,

    /// Policy probabilities, `[rows_full, batch_b, policy_len]`; empty when
    /// the buffer does not store policies.
    pub policy: Vec<f32>,

    /// Importance sampling weights, one per column. Priority mode only.
    pub weights: Option<Vec<f32>>,

    /// Raw sampled priorities, one per column. Priority mode only.
    pub priorities: Option<Vec<f32>>,

    /// Logical time index of each column's first row.
    pub t_idxs: Vec<u64>,

    /// Environment index of each column.
    pub b_idxs: Vec<usize>,

    /// Nominal window length.
    pub batch_t: usize,

    /// Full window length, `batch_t + n_step + 1`.
    pub rows_full: usize,

    /// Number of sampled sequences (columns).
    pub batch_b: usize,

    /// Flattened observation length.
    pub obs_len: usize,

    /// Flattened policy vector length.
    pub policy_len: usize,
}

impl SequenceBatch {
    /// Observation at `(row, col)`.
    pub fn obs_at(&self, row: usize, col: usize) -> &[u8] {
        let start = (row * self.batch_b + col) * self.obs_len;
        &self.obs[start..start + self.obs_len]
    }

    /// Copies the observation at `(src_row, col)` into `(dst_row, col)`.
    pub(crate) fn copy_obs_within(&mut self, src_row: usize, dst_row: usize, col: usize) {
        let src = (src_row * self.batch_b + col) * self.obs_len;
        let dst = (dst_row * self.batch_b + col) * self.obs_len;
        let frame = self.obs[src..src + self.obs_len].to_vec();
        self.obs[dst..dst + self.obs_len].copy_from_slice(&frame);
    }

    /// Flat index of `(row, col)` in scalar fields.
    #[inline]
    pub fn at(&self, row: usize, col: usize) -> usize {
        row * self.batch_b + col
    }
}
