//! Core traits of the replay engine.
mod replay_buffer;
pub use replay_buffer::{ExperienceBufferBase, ReplayBufferBase, SampleOutcome};
