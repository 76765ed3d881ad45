//! Replay buffer interfaces.
//!
//! Two traits split the buffer's surface along the writer/reader ownership
//! boundary: [`ExperienceBufferBase`] is the appending side, held exclusively
//! by the environment-interaction loop (or a proxy forwarding to it), while
//! [`ReplayBufferBase`] is the sampling side, held by the training loop.

use crate::error::ReplayError;
use anyhow::Result;

/// Outcome of a sampling attempt.
///
/// Sampling and extraction are not atomic with respect to ring overwrites,
/// so a syntactically valid sample can name indices that are stale by the
/// time extraction runs. Such transient failures are reported as
/// [`SampleOutcome::Retry`] rather than an error: the caller retries the
/// whole sample-extract cycle with fresh indices. Configuration-level
/// failures are returned as `Err` and must halt training.
pub enum SampleOutcome<B> {
    /// A complete, sanitized batch.
    Batch(B),

    /// The attempt raced a writer overwrite; retry from scratch.
    Retry(ReplayError),
}

impl<B> SampleOutcome<B> {
    /// Unwraps the batch, panicking on [`SampleOutcome::Retry`].
    ///
    /// Intended for tests and single-threaded use where no writer races
    /// the sampler.
    pub fn into_batch(self) -> B {
        match self {
            SampleOutcome::Batch(batch) => batch,
            SampleOutcome::Retry(e) => panic!("sample requires retry: {}", e),
        }
    }
}

/// Interface for buffers that store experiences from environments.
pub trait ExperienceBufferBase {
    /// The type of items pushed into the buffer.
    type Item;

    /// Pushes an item into the buffer.
    fn push(&mut self, step: Self::Item) -> Result<()>;

    /// Returns the number of timesteps currently held.
    fn len(&self) -> usize;

    /// Returns `true` if the buffer holds no timesteps.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Interface for replay buffers that generate training batches.
pub trait ReplayBufferBase {
    /// Configuration parameters of the buffer.
    type Config: Clone;

    /// The type of batch generated for training.
    type Batch;

    /// Builds a replay buffer from the given configuration.
    ///
    /// Fails if the configuration is inconsistent, e.g. the requested
    /// sequence window does not fit the per-environment capacity.
    fn build(config: &Self::Config) -> Result<Self>
    where
        Self: Sized;

    /// Samples `batch_b` sequences.
    ///
    /// Returns [`SampleOutcome::Retry`] on transient extraction races and
    /// `Err` on configuration-level failures (see [`ReplayError`]).
    fn sample(&mut self, batch_b: usize) -> Result<SampleOutcome<Self::Batch>>;

    /// Updates the priorities of previously sampled sequences.
    ///
    /// `t_idxs`/`b_idxs` are the index pairs reported in the sampled batch.
    /// Pairs whose slot has been overwritten since sampling are skipped.
    /// No-op for buffers without prioritization.
    fn update_priority(&mut self, t_idxs: &[u64], b_idxs: &[usize], priorities: &[f32]);
}
