//! Errors in the asynchronous coordination layer.
use thiserror::Error;

/// Errors raised by the writer/reader coordination.
#[derive(Error, Debug)]
pub enum AsyncReplayError {
    /// The sample-extract cycle kept racing the writer and the configured
    /// retry budget ran out.
    #[error("sampling failed after {attempts} attempts")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: usize,
    },

    /// Sending a step message to the reader failed (channel full or
    /// disconnected).
    #[error("failed to send step message to the reader")]
    SendStepFailed,

    /// A configuration-level failure of the replay engine. Must halt
    /// training.
    #[error("replay engine error: {0}")]
    Replay(#[from] anyhow::Error),
}
