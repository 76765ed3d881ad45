#![warn(missing_docs)]
//! Replay data management for model-based reinforcement learning.
//!
//! This crate implements the in-process storage and sampling engine that
//! feeds a model-based training loop: a prioritized sequence replay buffer
//! over `[time, environment]` slots with circular overwrite, sum-tree
//! priority sampling, n-step return extraction and terminal-boundary
//! sanitization. Writer/reader coordination across threads lives in the
//! `reverie-async` crate.
pub mod error;
pub mod sequence_buffer;

mod base;
pub use base::{ExperienceBufferBase, ReplayBufferBase, SampleOutcome};
