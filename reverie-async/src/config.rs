//! Configuration of the writer and reader handles.
use serde::{Deserialize, Serialize};

/// Configuration of [`ReplayWriter`](crate::ReplayWriter).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReplayWriterConfig {
    /// Number of timesteps buffered locally before a message is sent.
    pub n_buffer: usize,
}

impl Default for ReplayWriterConfig {
    fn default() -> Self {
        Self { n_buffer: 16 }
    }
}

/// Configuration of [`ReplayReader`](crate::ReplayReader).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReplayReaderConfig {
    /// Attempts of the sample-pull-retry cycle before giving up.
    pub max_retries: usize,

    /// Base backoff between attempts, in milliseconds. Attempt `k` sleeps
    /// `k * backoff_ms`.
    pub backoff_ms: u64,
}

impl Default for ReplayReaderConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 10,
        }
    }
}
