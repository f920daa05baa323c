use std::sync::Arc;

use parking_lot::Mutex;

use crate::reactive::{DeliverError, Reactive};
use crate::value::{Occurrence, Value};

/// A read-only event source over a lazy sequence.
///
/// Reuses the event-stream interface so a prebuilt (finite or infinite)
/// sequence can feed into the network. The sequence is advanced one element
/// per consume; a one-slot peek buffer backs `next_value`/`available`.
/// Deliveries are unsupported.
pub struct SeqStream {
    label: String,
    state: Mutex<SeqState>,
}

struct SeqState {
    iter: Box<dyn Iterator<Item = Value> + Send>,
    peeked: Option<Occurrence>,
    exhausted: bool,
    last_occ: Option<Occurrence>,
}

impl SeqState {
    fn fill_peek(&mut self) {
        if self.peeked.is_none() && !self.exhausted {
            match self.iter.next() {
                Some(value) => self.peeked = Some(Occurrence::now(value)),
                None => self.exhausted = true,
            }
        }
    }
}

impl SeqStream {
    pub fn new(
        label: impl Into<String>,
        iter: impl Iterator<Item = Value> + Send + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            state: Mutex::new(SeqState {
                iter: Box::new(iter),
                peeked: None,
                exhausted: false,
                last_occ: None,
            }),
        })
    }

    pub fn from_values(label: impl Into<String>, values: Vec<Value>) -> Arc<Self> {
        Self::new(label, values.into_iter())
    }

    /// The most recently consumed occurrence.
    pub fn last_occurrence(&self) -> Option<Occurrence> {
        self.state.lock().last_occ.clone()
    }
}

impl Reactive for SeqStream {
    fn label(&self) -> &str {
        &self.label
    }

    fn next_value(&self) -> Option<Occurrence> {
        let mut state = self.state.lock();
        state.fill_peek();
        state.peeked.clone()
    }

    fn available(&self) -> bool {
        let mut state = self.state.lock();
        state.fill_peek();
        state.peeked.is_some()
    }

    fn pending(&self) -> bool {
        self.available()
    }

    fn completed(&self) -> bool {
        let mut state = self.state.lock();
        state.fill_peek();
        state.exhausted && state.peeked.is_none()
    }

    fn consume(&self) -> Option<Occurrence> {
        let mut state = self.state.lock();
        state.fill_peek();
        let head = state.peeked.take()?;
        state.last_occ = Some(head.clone());
        Some(head)
    }

    fn deliver(&self, _occurrence: Occurrence) -> Result<bool, DeliverError> {
        Err(DeliverError::Unsupported { kind: "SeqStream" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finite_sequence_drains_to_completed() {
        let s = SeqStream::from_values("s", vec![Value::int(1), Value::int(2)]);
        assert!(s.available());
        assert!(!s.completed());
        assert!(s.last_occurrence().is_none());

        assert_eq!(s.consume().unwrap().value, Value::int(1));
        assert_eq!(s.last_occurrence().unwrap().value, Value::int(1));
        assert_eq!(s.consume().unwrap().value, Value::int(2));
        assert_eq!(s.last_occurrence().unwrap().value, Value::int(2));
        assert!(s.consume().is_none());
        assert!(s.completed());
        assert!(!s.available());
    }

    #[test]
    fn infinite_sequence_never_completes() {
        let s = SeqStream::new("naturals", (0..).map(Value::int));
        for expected in 0..5 {
            assert_eq!(s.next_value().unwrap().value, Value::int(expected));
            assert_eq!(s.consume().unwrap().value, Value::int(expected));
        }
        assert!(!s.completed());
    }

    #[test]
    fn delivery_is_unsupported() {
        let s = SeqStream::from_values("s", vec![]);
        assert_eq!(
            s.deliver(Occurrence::now(Value::Unit)),
            Err(DeliverError::Unsupported { kind: "SeqStream" })
        );
    }

    #[test]
    fn peek_does_not_advance() {
        let s = SeqStream::from_values("s", vec![Value::int(7)]);
        assert_eq!(s.next_value().unwrap().value, Value::int(7));
        assert_eq!(s.next_value().unwrap().value, Value::int(7));
        assert_eq!(s.consume().unwrap().value, Value::int(7));
    }
}
