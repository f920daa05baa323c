#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use rill::{Link, LinkInput, Reactive, SharedReactive, Value};

/// A recording sink: a link that appends every value it sees to a shared
/// vector. The link has no outputs, so it is always schedulable while its
/// input is live.
pub fn observer(source: &SharedReactive) -> (Link, Arc<Mutex<Vec<Value>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let link = Link::new(
        format!("observe-{}", source.label()),
        vec![source.clone()],
        &[],
    )
    .with_link_fn(Arc::new(move |input: &LinkInput| {
        if let Some((_, occurrence)) = input.input_occurrences.first() {
            sink.lock().push(occurrence.value.clone());
        }
        Ok(None)
    }));
    (link, seen)
}

/// Poll until `cond` holds or the timeout elapses; returns the final check.
pub fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().copied().map(Value::int).collect()
}

pub fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
