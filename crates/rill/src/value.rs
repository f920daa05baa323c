use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond timestamp attached to every value flowing through the network.
pub type Timestamp = u64;

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Value carried by reactive occurrences.
///
/// `Completed` is the completion sentinel: it round-trips through delivery
/// like any other value and compares equal only to itself. Multi-input links
/// zip their inputs into a `List`.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Number(f64),
    Text(Arc<str>),
    Bool(bool),
    Unit,
    List(Arc<[Value]>),
    Completed,
}

impl Value {
    pub fn int(n: i64) -> Self {
        Value::Number(n as f64)
    }

    pub fn text(s: impl Into<Arc<str>>) -> Self {
        Value::Text(s.into())
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(items.into_iter().collect())
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Value::Completed)
    }

    /// Convert to a display string for logging and text interpolation.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Number(n) => n.to_string(),
            Value::Text(s) => s.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Unit => String::new(),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(|v| v.to_display_string()).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Completed => "<completed>".to_string(),
        }
    }
}

/// A timestamped value: the unit a reactive emits and a link transforms.
#[derive(Clone, Debug, PartialEq)]
pub struct Occurrence {
    pub value: Value,
    pub at: Timestamp,
}

impl Occurrence {
    pub fn new(value: Value, at: Timestamp) -> Self {
        Self { value, at }
    }

    /// An occurrence stamped with the current time.
    pub fn now(value: Value) -> Self {
        Self::new(value, now_millis())
    }

    /// The completion sentinel, stamped now.
    pub fn completed() -> Self {
        Self::now(Value::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_compares_equal_only_to_itself() {
        assert_eq!(Value::Completed, Value::Completed);
        assert_ne!(Value::Completed, Value::Unit);
        assert_ne!(Value::Completed, Value::int(0));
        assert_ne!(Value::Completed, Value::text("completed"));
    }

    #[test]
    fn list_zips_values() {
        let list = Value::list([Value::int(1), Value::text("a")]);
        assert_eq!(list.to_display_string(), "[1, a]");
    }

    #[test]
    fn occurrence_now_is_monotonic_enough() {
        let a = Occurrence::now(Value::Unit);
        let b = Occurrence::now(Value::Unit);
        assert!(b.at >= a.at);
    }
}
