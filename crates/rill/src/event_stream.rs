use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::reactive::{DeliverError, Reactive};
use crate::value::Occurrence;

/// Default bound on an event stream's queue.
pub const DEFAULT_MAX_QUEUE: usize = 1000;

/// A discrete event source backed by a bounded FIFO queue.
///
/// Values queue up until consumed, one per propagation round. Delivering the
/// completion sentinel sets the completed flag but leaves the queue in place,
/// so already-queued occurrences still drain; the stream reports `completed`
/// once the flag is set and the queue is empty.
pub struct EventStream {
    label: String,
    capacity: usize,
    state: Mutex<StreamState>,
}

struct StreamState {
    queue: VecDeque<Occurrence>,
    last_occ: Option<Occurrence>,
    completed: bool,
}

impl EventStream {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Self::with_capacity(label, DEFAULT_MAX_QUEUE)
    }

    pub fn with_capacity(label: impl Into<String>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            capacity,
            state: Mutex::new(StreamState {
                queue: VecDeque::new(),
                last_occ: None,
                completed: false,
            }),
        })
    }

    /// The most recently consumed occurrence.
    pub fn last_occurrence(&self) -> Option<Occurrence> {
        self.state.lock().last_occ.clone()
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl Reactive for EventStream {
    fn label(&self) -> &str {
        &self.label
    }

    fn next_value(&self) -> Option<Occurrence> {
        self.state.lock().queue.front().cloned()
    }

    fn available(&self) -> bool {
        !self.state.lock().queue.is_empty()
    }

    fn pending(&self) -> bool {
        self.available()
    }

    fn completed(&self) -> bool {
        let state = self.state.lock();
        state.completed && state.queue.is_empty()
    }

    fn consume(&self) -> Option<Occurrence> {
        let mut state = self.state.lock();
        let head = state.queue.pop_front()?;
        state.last_occ = Some(head.clone());
        Some(head)
    }

    fn deliver(&self, occurrence: Occurrence) -> Result<bool, DeliverError> {
        let mut state = self.state.lock();
        if state.completed {
            if occurrence.value.is_completed() {
                return Ok(false);
            }
            return Err(DeliverError::Completed);
        }
        if occurrence.value.is_completed() {
            state.completed = true;
            return Ok(false);
        }
        if state.queue.len() >= self.capacity {
            return Err(DeliverError::Overflow {
                capacity: self.capacity,
            });
        }
        state.queue.push_back(occurrence);
        Ok(true)
    }
}
