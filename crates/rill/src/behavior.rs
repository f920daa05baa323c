use std::sync::Arc;

use parking_lot::Mutex;

use crate::reactive::{DeliverError, Reactive};
use crate::value::{Occurrence, Value};

/// A continuous time-varying value.
///
/// A behavior always has a current value and is always available while live.
/// Delivering a value equal to the current cell is dropped without marking
/// the behavior fresh, so behaviors have value-identity semantics and equal
/// deliveries cause no spurious propagation.
pub struct Behavior {
    label: String,
    state: Mutex<BehaviorState>,
}

struct BehaviorState {
    cell: Occurrence,
    /// The cell holds a value not yet consumed by a propagation round.
    fresh: bool,
    live: bool,
}

impl Behavior {
    pub fn new(label: impl Into<String>, value: Value) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            state: Mutex::new(BehaviorState {
                cell: Occurrence::now(value),
                fresh: false,
                live: true,
            }),
        })
    }

    /// Sample the current cell without touching the fresh flag.
    pub fn current(&self) -> Occurrence {
        self.state.lock().cell.clone()
    }
}

impl Reactive for Behavior {
    fn label(&self) -> &str {
        &self.label
    }

    fn next_value(&self) -> Option<Occurrence> {
        Some(self.state.lock().cell.clone())
    }

    fn available(&self) -> bool {
        self.state.lock().live
    }

    fn pending(&self) -> bool {
        let state = self.state.lock();
        state.live && state.fresh
    }

    fn completed(&self) -> bool {
        !self.state.lock().live
    }

    fn consume(&self) -> Option<Occurrence> {
        let mut state = self.state.lock();
        state.fresh = false;
        Some(state.cell.clone())
    }

    fn deliver(&self, occurrence: Occurrence) -> Result<bool, DeliverError> {
        let mut state = self.state.lock();
        if !state.live {
            // Completion is idempotent; anything else is rejected.
            if occurrence.value.is_completed() {
                return Ok(false);
            }
            return Err(DeliverError::NotLive);
        }
        if occurrence.value.is_completed() {
            state.live = false;
            return Ok(false);
        }
        if state.cell.value == occurrence.value {
            return Ok(false);
        }
        state.cell = occurrence;
        state.fresh = true;
        Ok(true)
    }
}
