//! Messages exchanged between the writer and the reader.

/// A chunk of timesteps sent from a [`ReplayWriter`](crate::ReplayWriter)
/// to the reader-owned replay engine.
pub struct StepMessage<T> {
    /// Id of the sending writer.
    pub id: usize,

    /// Timesteps in append order.
    pub steps: Vec<T>,
}
