use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::executor::Executor;
use crate::reactive::{Reactive, SharedReactive, WeakReactive};
use crate::value::{now_millis, Occurrence, Value};

/// Monotonically increasing link identifier.
///
/// Also the deterministic tie-break among sibling links at the same level:
/// candidates sort by `(level, id)`, so siblings evaluate in insertion order.
pub type LinkId = u64;

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

fn next_link_id() -> LinkId {
    NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed)
}

/// The input-side view a link function receives: the peeked values of the
/// link's inputs and strong references to its still-live outputs.
#[derive(Clone)]
pub struct LinkInput {
    pub label: Arc<str>,
    pub input_occurrences: Vec<(SharedReactive, Occurrence)>,
    pub output_reactives: Vec<SharedReactive>,
}

impl LinkInput {
    /// The peeked value of a single-input link.
    pub fn single_value(&self) -> Option<&Value> {
        match self.input_occurrences.as_slice() {
            [(_, occ)] => Some(&occ.value),
            _ => None,
        }
    }

    /// An outcome delivering the given occurrence to every live output.
    pub fn broadcast(&self, occurrence: Occurrence) -> Outcome {
        Outcome {
            output_occurrences: self
                .output_reactives
                .iter()
                .map(|r| (r.clone(), occurrence.clone()))
                .collect(),
            ..Outcome::default()
        }
    }
}

/// What a link function hands back: zero or more of the orthogonal fields.
///
/// Deliberately a bag of optional fields rather than a sum type; callers set
/// whatever combination the situation needs.
#[derive(Default)]
pub struct Outcome {
    /// Values to deliver, each aimed at a target reactive.
    pub output_occurrences: Vec<(SharedReactive, Occurrence)>,
    /// Suppress the default consume of all the link's inputs this round.
    pub no_consume: bool,
    /// New links to splice into the network.
    pub add: Vec<Link>,
    /// Predicate selecting links to drop from the network.
    pub remove_by: Option<LinkFilter>,
    /// Raise the alive counter of these reactives.
    pub dont_complete: Vec<SharedReactive>,
    /// Lower the alive counter of these reactives.
    pub allow_complete: Vec<SharedReactive>,
    /// An error to surface through the link's error path.
    pub error: Option<anyhow::Error>,
}

impl Outcome {
    /// An outcome that only delivers one value.
    pub fn deliver(target: SharedReactive, occurrence: Occurrence) -> Self {
        Outcome {
            output_occurrences: vec![(target, occurrence)],
            ..Outcome::default()
        }
    }

    /// An outcome that only splices in new links.
    pub fn add_links(links: Vec<Link>) -> Self {
        Outcome {
            add: links,
            ..Outcome::default()
        }
    }

    /// An outcome that only removes links matching the predicate.
    pub fn remove_links(filter: impl Fn(&Link) -> bool + Send + Sync + 'static) -> Self {
        Outcome {
            remove_by: Some(Arc::new(filter)),
            ..Outcome::default()
        }
    }

    pub fn with_output(mut self, target: SharedReactive, occurrence: Occurrence) -> Self {
        self.output_occurrences.push((target, occurrence));
        self
    }

    pub fn with_no_consume(mut self) -> Self {
        self.no_consume = true;
        self
    }
}

pub type LinkFnResult = Result<Option<Outcome>, anyhow::Error>;

/// The evaluation function of a link. Returning `Ok(None)` means no
/// propagation; inputs are still consumed unless `no_consume` was requested.
/// An `Err` is the caught "exception" routed to the link's error path.
pub type LinkFn = Arc<dyn Fn(&LinkInput) -> LinkFnResult + Send + Sync>;

/// Error handler: receives the evaluation error and the same input view; its
/// outcome (if any) is used in place of the failed evaluation's.
pub type ErrorFn = Arc<dyn Fn(&anyhow::Error, &LinkInput) -> Option<Outcome> + Send + Sync>;

/// Fired when a specific input reactive of the link completes.
pub type CompleteFn = Arc<dyn Fn(&Link, &SharedReactive) -> Option<Outcome> + Send + Sync>;

/// Predicate over links, used by `remove_by`.
pub type LinkFilter = Arc<dyn Fn(&Link) -> bool + Send + Sync>;

/// A static hyperedge: ordered input reactives, an evaluation function, and
/// ordered output reactives held weakly.
///
/// Links are immutable records; reconfiguration replaces the link in the
/// network. Outputs are weak so a derived reactive abandoned by user code
/// lets its links be pruned (a collected output counts as completed).
#[derive(Clone)]
pub struct Link {
    id: LinkId,
    pub label: Arc<str>,
    pub inputs: Vec<SharedReactive>,
    outputs: Vec<WeakReactive>,
    pub link_fn: LinkFn,
    pub error_fn: Option<ErrorFn>,
    pub complete_fn: Option<CompleteFn>,
    /// Reactives to release (via the alive counter) when this link is removed.
    pub complete_on_remove: Vec<SharedReactive>,
    /// When set, the link is evaluated asynchronously on this executor.
    pub executor: Option<Arc<dyn Executor>>,
}

impl Link {
    /// Create a link with the default fan evaluation function.
    ///
    /// Panics if `inputs` is empty: a link must be anchored to at least one
    /// input reactive.
    pub fn new(
        label: impl Into<Arc<str>>,
        inputs: Vec<SharedReactive>,
        outputs: &[SharedReactive],
    ) -> Self {
        assert!(!inputs.is_empty(), "link inputs must be non-empty");
        Self {
            id: next_link_id(),
            label: label.into(),
            inputs,
            outputs: outputs.iter().map(Arc::downgrade).collect(),
            link_fn: Arc::new(default_link_fn),
            error_fn: None,
            complete_fn: None,
            complete_on_remove: Vec::new(),
            executor: None,
        }
    }

    pub fn with_link_fn(mut self, link_fn: LinkFn) -> Self {
        self.link_fn = link_fn;
        self
    }

    pub fn with_error_fn(mut self, error_fn: ErrorFn) -> Self {
        self.error_fn = Some(error_fn);
        self
    }

    pub fn with_complete_fn(mut self, complete_fn: CompleteFn) -> Self {
        self.complete_fn = Some(complete_fn);
        self
    }

    pub fn with_complete_on_remove(mut self, reactives: Vec<SharedReactive>) -> Self {
        self.complete_on_remove = reactives;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    /// The declared number of outputs, collected or not.
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Outputs that are still strongly held somewhere.
    pub fn live_outputs(&self) -> Vec<SharedReactive> {
        self.outputs.iter().filter_map(WeakReactive::upgrade).collect()
    }

    /// Outputs in declaration order, `None` where the reactive was collected.
    pub fn outputs(&self) -> Vec<Option<SharedReactive>> {
        self.outputs.iter().map(WeakReactive::upgrade).collect()
    }

    /// A link is ready when every input is available and, if it declares
    /// outputs, at least one of them is still live and not completed. The
    /// engine schedules only ready links.
    pub fn ready(&self) -> bool {
        if !self.inputs.iter().all(|input| input.available()) {
            return false;
        }
        if self.outputs.is_empty() {
            return true;
        }
        self.outputs
            .iter()
            .filter_map(WeakReactive::upgrade)
            .any(|output| !output.completed())
    }

    /// A link is dead when its declared outputs are all completed (collected
    /// outputs count as completed) or any of its inputs is completed. Dead
    /// links are pruned by the engine.
    pub fn dead(&self) -> bool {
        if !self.outputs.is_empty() {
            let all_outputs_done = self
                .outputs
                .iter()
                .all(|weak| weak.upgrade().map_or(true, |output| output.completed()));
            if all_outputs_done {
                return true;
            }
        }
        self.inputs.iter().any(|input| input.completed())
    }

    /// A copy of this link (same id, same graph position) with the error
    /// handler replaced. Used by `on_error` reconfiguration.
    pub(crate) fn with_replaced_error_fn(&self, error_fn: ErrorFn) -> Link {
        let mut link = self.clone();
        link.error_fn = Some(error_fn);
        link
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("async", &self.executor.is_some())
            .finish()
    }
}

/// The default evaluation function: a fan.
///
/// One input broadcasts its single value to all outputs; several inputs
/// broadcast the list of their zipped values, stamped with the latest input
/// timestamp.
pub fn default_link_fn(input: &LinkInput) -> LinkFnResult {
    let occurrence = match input.input_occurrences.as_slice() {
        [] => return Ok(None),
        [(_, occ)] => occ.clone(),
        many => {
            let at = many.iter().map(|(_, occ)| occ.at).max().unwrap_or_else(now_millis);
            let zipped = Value::list(many.iter().map(|(_, occ)| occ.value.clone()));
            Occurrence::new(zipped, at)
        }
    };
    Ok(Some(input.broadcast(occurrence)))
}

/// Adapt a plain function over values into a link function broadcasting to
/// all outputs. Returning `None` from `f` suppresses propagation for that
/// value (the input is still consumed).
pub fn value_fn(
    f: impl Fn(&Value) -> Option<Value> + Send + Sync + 'static,
) -> LinkFn {
    Arc::new(move |input: &LinkInput| {
        let Some((_, occ)) = input.input_occurrences.first() else {
            return Ok(None);
        };
        Ok(f(&occ.value).map(|value| input.broadcast(Occurrence::new(value, occ.at))))
    })
}

/// Adapt a fallible function over values; an `Err` takes the link's error
/// path exactly as a failed link function would.
pub fn try_value_fn(
    f: impl Fn(&Value) -> Result<Option<Value>, anyhow::Error> + Send + Sync + 'static,
) -> LinkFn {
    Arc::new(move |input: &LinkInput| {
        let Some((_, occ)) = input.input_occurrences.first() else {
            return Ok(None);
        };
        Ok(f(&occ.value)?.map(|value| input.broadcast(Occurrence::new(value, occ.at))))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_stream::EventStream;
    use crate::reactive::same_reactive;

    fn input_for(link: &Link, occurrences: Vec<(SharedReactive, Occurrence)>) -> LinkInput {
        LinkInput {
            label: link.label.clone(),
            input_occurrences: occurrences,
            output_reactives: link.live_outputs(),
        }
    }

    #[test]
    fn ids_are_monotonic() {
        let s: SharedReactive = EventStream::new("s");
        let out: SharedReactive = EventStream::new("out");
        let a = Link::new("a", vec![s.clone()], &[out.clone()]);
        let b = Link::new("b", vec![s], &[out]);
        assert!(b.id() > a.id());
    }

    #[test]
    #[should_panic(expected = "non-empty")]
    fn empty_inputs_panic() {
        let out: SharedReactive = EventStream::new("out");
        let _ = Link::new("bad", vec![], &[out]);
    }

    #[test]
    fn default_fan_broadcasts_single_input() {
        let s: SharedReactive = EventStream::new("s");
        let out1: SharedReactive = EventStream::new("out1");
        let out2: SharedReactive = EventStream::new("out2");
        let link = Link::new("fan", vec![s.clone()], &[out1.clone(), out2.clone()]);

        let occ = Occurrence::now(Value::int(7));
        let input = input_for(&link, vec![(s, occ.clone())]);
        let outcome = default_link_fn(&input).unwrap().unwrap();

        assert_eq!(outcome.output_occurrences.len(), 2);
        assert!(same_reactive(&outcome.output_occurrences[0].0, &out1));
        assert!(same_reactive(&outcome.output_occurrences[1].0, &out2));
        assert_eq!(outcome.output_occurrences[0].1, occ);
    }

    #[test]
    fn default_fan_zips_multiple_inputs() {
        let a: SharedReactive = EventStream::new("a");
        let b: SharedReactive = EventStream::new("b");
        let out: SharedReactive = EventStream::new("out");
        let link = Link::new("zip", vec![a.clone(), b.clone()], &[out.clone()]);

        let input = input_for(
            &link,
            vec![
                (a, Occurrence::new(Value::int(1), 10)),
                (b, Occurrence::new(Value::int(2), 20)),
            ],
        );
        let outcome = default_link_fn(&input).unwrap().unwrap();
        let (_, occ) = &outcome.output_occurrences[0];
        assert_eq!(occ.value, Value::list([Value::int(1), Value::int(2)]));
        assert_eq!(occ.at, 20);
    }

    #[test]
    fn collected_output_disappears_from_live_outputs() {
        let s: SharedReactive = EventStream::new("s");
        let out: SharedReactive = EventStream::new("out");
        let link = Link::new("fan", vec![s], &[out.clone()]);

        assert_eq!(link.live_outputs().len(), 1);
        assert!(link.outputs()[0].is_some());

        drop(out);
        assert_eq!(link.live_outputs().len(), 0);
        // The declaration-order view keeps the slot, now empty.
        assert_eq!(link.output_count(), 1);
        assert!(link.outputs()[0].is_none());
    }

    #[test]
    fn value_fn_maps_and_filters() {
        let s: SharedReactive = EventStream::new("s");
        let out: SharedReactive = EventStream::new("out");
        let link = Link::new("evens", vec![s.clone()], &[out.clone()]).with_link_fn(value_fn(|v| {
            match v {
                Value::Number(n) if (*n as i64) % 2 == 0 => Some(Value::Number(n * 10.0)),
                _ => None,
            }
        }));

        let even = input_for(&link, vec![(s.clone(), Occurrence::now(Value::int(2)))]);
        let outcome = (link.link_fn)(&even).unwrap().unwrap();
        assert_eq!(outcome.output_occurrences[0].1.value, Value::int(20));

        let odd = input_for(&link, vec![(s, Occurrence::now(Value::int(3)))]);
        assert!((link.link_fn)(&odd).unwrap().is_none());
    }
}
