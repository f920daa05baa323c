use std::sync::Arc;

use crate::reactive::{DeliverError, Reactive};
use crate::value::{Occurrence, Value};

/// A behavior that samples a pure function on every read.
///
/// Never pending, so it never initiates a propagation cycle on its own:
/// callers push into the network, or a combinator schedules sampling.
pub struct FnBehavior {
    label: String,
    f: Box<dyn Fn() -> Value + Send + Sync>,
}

impl FnBehavior {
    pub fn new(
        label: impl Into<String>,
        f: impl Fn() -> Value + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            f: Box::new(f),
        })
    }
}

impl Reactive for FnBehavior {
    fn label(&self) -> &str {
        &self.label
    }

    fn next_value(&self) -> Option<Occurrence> {
        Some(Occurrence::now((self.f)()))
    }

    fn available(&self) -> bool {
        true
    }

    fn pending(&self) -> bool {
        false
    }

    fn completed(&self) -> bool {
        false
    }

    fn consume(&self) -> Option<Occurrence> {
        self.next_value()
    }

    fn deliver(&self, _occurrence: Occurrence) -> Result<bool, DeliverError> {
        Err(DeliverError::Unsupported {
            kind: "FnBehavior",
        })
    }
}
