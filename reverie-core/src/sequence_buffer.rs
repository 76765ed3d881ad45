//! Prioritized sequence replay buffer.
//!
//! The buffer stores temporally ordered transitions in a fixed-capacity
//! circular array with one time axis and one axis per parallel environment.
//! Sampling extracts contiguous, wraparound-safe training windows together
//! with n-step returns and (in priority mode) importance sampling weights,
//! and sanitizes windows that cross an episode boundary.
//!
//! # Key components
//!
//! - [`SequenceReplayBuffer`]: the replay engine
//! - [`StepBatch`] / [`SequenceBatch`]: writer-side record and sampled batch
//! - [`SequenceBufferConfig`] / [`PerConfig`]: configuration
//! - [`sanitize_batch`]: terminal-boundary sanitization

mod base;
mod batch;
mod config;
mod sanitize;
mod store;
pub use base::{IwScheduler, SequenceReplayBuffer};
pub use batch::{SequenceBatch, StepBatch};
pub use config::{PerConfig, SequenceBufferConfig};
pub use sanitize::sanitize_batch;
