//! Scheduling the exponent of importance sampling weights.
use serde::{Deserialize, Serialize};

/// Linear annealing of the importance sampling exponent beta.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct IwScheduler {
    /// Initial value of beta.
    pub beta_0: f32,

    /// Final value of beta.
    pub beta_final: f32,

    /// Priority updates after which beta reaches its final value.
    pub n_opts_final: usize,

    /// Priority updates so far.
    pub n_opts: usize,
}

impl IwScheduler {
    /// Creates a scheduler.
    pub fn new(beta_0: f32, beta_final: f32, n_opts_final: usize) -> Self {
        Self {
            beta_0,
            beta_final,
            n_opts_final,
            n_opts: 0,
        }
    }

    /// Current exponent of the importance sampling weight.
    pub fn beta(&self) -> f32 {
        let n_opts = self.n_opts;
        if n_opts >= self.n_opts_final {
            self.beta_final
        } else {
            let d = self.beta_final - self.beta_0;
            self.beta_0 + d * (n_opts as f32 / self.n_opts_final as f32)
        }
    }

    /// Advances the schedule by one priority update.
    pub fn add_n_opts(&mut self) {
        self.n_opts += 1;
    }
}
