use std::sync::{Arc, Weak};

use thiserror::Error;

use crate::value::Occurrence;

/// Error returned by [`Reactive::deliver`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliverError {
    /// The target's queue is full. The engine re-enqueues the delivery as a
    /// fresh stimulus, so the producer is neither blocked nor dropped.
    #[error("queue full (capacity {capacity})")]
    Overflow { capacity: usize },

    /// The target is completed and accepts no further values.
    #[error("reactive is completed")]
    Completed,

    /// The target kind does not accept deliveries at all. A programmer
    /// error, not a dataflow condition.
    #[error("{kind} does not accept deliveries")]
    Unsupported { kind: &'static str },

    /// A behavior was delivered to after its live flag was cleared.
    #[error("behavior is no longer live")]
    NotLive,
}

/// A source of timestamped values.
///
/// Behaviors model continuous values (always available); event streams model
/// discrete occurrences (available only while queued). The network only ever
/// talks to reactives through this capability set.
pub trait Reactive: Send + Sync {
    fn label(&self) -> &str;

    /// Peek the value that `consume` would return, without consuming it.
    fn next_value(&self) -> Option<Occurrence>;

    /// A value is ready to be consumed.
    fn available(&self) -> bool;

    /// A value waits that will cause propagation.
    fn pending(&self) -> bool;

    /// Terminal state: no further values accepted or produced.
    fn completed(&self) -> bool;

    /// Read the current value and advance state.
    fn consume(&self) -> Option<Occurrence>;

    /// Push a value in. `Ok(true)` means propagation should run. Delivering
    /// `Value::Completed` transitions the reactive to its completed state.
    fn deliver(&self, occurrence: Occurrence) -> Result<bool, DeliverError>;
}

/// A reactive shared between user code and the network.
pub type SharedReactive = Arc<dyn Reactive>;

/// A weakly held reactive, used for link outputs so user-abandoned derived
/// reactives become collectable.
pub type WeakReactive = Weak<dyn Reactive>;

/// Thin data pointer of a shared reactive, used as its identity key.
pub fn reactive_ptr(reactive: &SharedReactive) -> usize {
    Arc::as_ptr(reactive) as *const () as usize
}

/// Identity comparison for shared reactives.
pub fn same_reactive(a: &SharedReactive, b: &SharedReactive) -> bool {
    reactive_ptr(a) == reactive_ptr(b)
}
