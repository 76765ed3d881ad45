//! The exclusive append handle of the interaction loop.
use crate::{AsyncReplayError, ReplayWriterConfig, StepMessage};
use anyhow::Result;
use crossbeam_channel::Sender;
use reverie_core::ExperienceBufferBase;

/// Writer-side handle of an asynchronously shared replay buffer.
///
/// Held by the environment-interaction loop as its only access to the
/// buffer: timesteps are buffered locally and shipped to the reader in
/// chunks of `n_buffer`, so the writer's append cadence never contends
/// with the reader's sampling cadence. Appending is non-blocking; a full
/// channel surfaces as an error instead of stalling the interaction loop.
pub struct ReplayWriter<T> {
    id: usize,

    /// Sender of [`StepMessage`]s.
    sender: Sender<StepMessage<T>>,

    /// Number of timesteps buffered until sent to the reader.
    n_buffer: usize,

    /// Locally buffered timesteps.
    buffer: Vec<T>,

    /// Total timesteps pushed through this writer.
    n_pushed: usize,
}

impl<T> ReplayWriter<T> {
    /// Creates a writer feeding the given channel.
    pub fn new(id: usize, config: &ReplayWriterConfig, sender: Sender<StepMessage<T>>) -> Self {
        let n_buffer = config.n_buffer.max(1);
        Self {
            id,
            sender,
            n_buffer,
            buffer: Vec::with_capacity(n_buffer),
            n_pushed: 0,
        }
    }

    /// Sends any locally buffered timesteps immediately.
    pub fn flush(&mut self) -> Result<(), AsyncReplayError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let mut buffer = Vec::with_capacity(self.n_buffer);
        std::mem::swap(&mut self.buffer, &mut buffer);

        let msg = StepMessage {
            id: self.id,
            steps: buffer,
        };
        self.sender
            .try_send(msg)
            .map_err(|_| AsyncReplayError::SendStepFailed)
    }
}

impl<T> ExperienceBufferBase for ReplayWriter<T> {
    type Item = T;

    fn push(&mut self, step: Self::Item) -> Result<()> {
        self.buffer.push(step);
        self.n_pushed += 1;
        if self.buffer.len() == self.n_buffer {
            self.flush()?;
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.n_pushed
    }
}
