#![warn(missing_docs)]
//! Asynchronous writer/reader coordination for the reverie replay engine.
//!
//! One writer (the environment-interaction loop) and one reader (the
//! training loop) share a replay buffer without fine-grained locking:
//! the writer ships timesteps over a bounded channel via [`ReplayWriter`],
//! and the reader merges them into its exclusively owned engine at explicit
//! [`ReplayReader::pull`] points before each sampling attempt. Transient
//! sample/overwrite races are resolved by a bounded retry loop with
//! backoff inside [`ReplayReader::sample`].
mod config;
mod error;
mod messages;
mod reader;
mod writer;
pub use config::{ReplayReaderConfig, ReplayWriterConfig};
pub use error::AsyncReplayError;
pub use messages::StepMessage;
pub use reader::ReplayReader;
pub use writer::ReplayWriter;

use crossbeam_channel::{bounded, Receiver, Sender};

/// Creates the bounded channel connecting writers to a reader.
pub fn step_channel<T>(cap: usize) -> (Sender<StepMessage<T>>, Receiver<StepMessage<T>>) {
    bounded(cap)
}
