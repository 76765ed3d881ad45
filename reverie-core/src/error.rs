//! Errors in the replay engine.
use thiserror::Error;

/// Errors raised by the sequence replay engine.
#[derive(Error, Debug)]
pub enum ReplayError {
    /// A sampled index was overwritten or not yet written between sampling
    /// and extraction. Recoverable: retry the whole sample-extract cycle.
    #[error(
        "stale indices (t_idxs: {t_idxs:?}, b_idxs: {b_idxs:?}, buffer t: {t_total})"
    )]
    StaleIndex {
        /// Logical time indices of the failed extraction.
        t_idxs: Vec<u64>,

        /// Environment indices of the failed extraction.
        b_idxs: Vec<usize>,

        /// Total number of timesteps written so far.
        t_total: u64,
    },

    /// Unique sampling was requested but the buffer holds fewer valid
    /// entries than the requested batch size. Fatal.
    #[error("requested {requested} unique samples, buffer holds {available}")]
    InsufficientUniqueSamples {
        /// Requested batch size.
        requested: usize,

        /// Number of sampleable (nonzero-priority) entries.
        available: usize,
    },

    /// A requested window cannot ever be satisfied by this buffer
    /// configuration. Fatal.
    #[error("out of range: {0}")]
    OutOfRange(String),
}

impl ReplayError {
    /// Whether the caller may recover by retrying the sample-extract cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ReplayError::StaleIndex { .. })
    }
}
