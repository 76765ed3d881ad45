//! The reader-side handle owning the replay engine.
use crate::{AsyncReplayError, ReplayReaderConfig, StepMessage};
use crossbeam_channel::{Receiver, TryRecvError};
use log::{debug, warn};
use reverie_core::{ExperienceBufferBase, ReplayBufferBase, SampleOutcome};
use std::{thread, time::Duration};

/// Reader-side handle of an asynchronously shared replay buffer.
///
/// Owns the canonical replay engine. The writer's appends become visible
/// only through [`ReplayReader::pull`], which drains the channel and merges
/// the received timesteps into the engine; this explicit pull point is the
/// only synchronization between the two sides. Priority write-back also
/// goes through this handle, keeping sum-tree updates serialized in the
/// single owner.
pub struct ReplayReader<R>
where
    R: ReplayBufferBase + ExperienceBufferBase,
{
    buffer: R,

    /// Receiver of [`StepMessage`]s from writers.
    receiver: Receiver<StepMessage<<R as ExperienceBufferBase>::Item>>,

    max_retries: usize,
    backoff: Duration,

    /// Set once every writer has disconnected.
    writers_done: bool,
}

impl<R> ReplayReader<R>
where
    R: ReplayBufferBase + ExperienceBufferBase,
{
    /// Creates a reader around an engine and the writers' channel.
    pub fn new(
        buffer: R,
        config: &ReplayReaderConfig,
        receiver: Receiver<StepMessage<<R as ExperienceBufferBase>::Item>>,
    ) -> Self {
        Self {
            buffer,
            receiver,
            max_retries: config.max_retries.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
            writers_done: false,
        }
    }

    /// Merges all pending writer appends into the engine.
    ///
    /// Returns the number of timesteps merged. Writer disconnection is not
    /// an error: the engine keeps serving batches from the data it holds.
    pub fn pull(&mut self) -> Result<usize, AsyncReplayError> {
        let mut n = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(msg) => {
                    debug!(
                        "pulled {} timesteps from writer {}",
                        msg.steps.len(),
                        msg.id
                    );
                    for step in msg.steps {
                        self.buffer.push(step)?;
                        n += 1;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.writers_done {
                        debug!("all writers disconnected");
                        self.writers_done = true;
                    }
                    break;
                }
            }
        }
        Ok(n)
    }

    /// Samples a training batch, retrying the whole pull-sample-extract
    /// cycle on transient failures.
    ///
    /// Each attempt first merges the writer's progress, then samples fresh
    /// indices; a stale extraction is never patched up partially. Bounded
    /// at `max_retries` attempts with linear backoff, after which
    /// [`AsyncReplayError::RetriesExhausted`] is returned. Fatal engine
    /// errors (configuration mismatch, insufficient unique entries)
    /// propagate immediately.
    pub fn sample(&mut self, batch_b: usize) -> Result<R::Batch, AsyncReplayError> {
        for attempt in 1..=self.max_retries {
            self.pull()?;
            match self.buffer.sample(batch_b)? {
                SampleOutcome::Batch(batch) => return Ok(batch),
                SampleOutcome::Retry(reason) => {
                    warn!(
                        "sample attempt {}/{} failed, retrying: {}",
                        attempt, self.max_retries, reason
                    );
                    if attempt < self.max_retries {
                        thread::sleep(self.backoff * attempt as u32);
                    }
                }
            }
        }
        Err(AsyncReplayError::RetriesExhausted {
            attempts: self.max_retries,
        })
    }

    /// Routes recomputed priorities back to the engine.
    pub fn update_priority(&mut self, t_idxs: &[u64], b_idxs: &[usize], priorities: &[f32]) {
        self.buffer.update_priority(t_idxs, b_idxs, priorities);
    }

    /// The owned replay engine.
    pub fn buffer(&self) -> &R {
        &self.buffer
    }

    /// Consumes the reader, returning the engine.
    pub fn into_inner(self) -> R {
        self.buffer
    }
}
