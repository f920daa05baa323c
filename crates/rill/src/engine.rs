//! The propagation engine: deliver → evaluate → consume → propagate.
//!
//! One stimulus drives one cycle. Within a cycle the engine repeatedly picks
//! the ready links of the lowest level, evaluates them against a shared peek
//! of their input values, consumes each input at most once per round (and
//! defers the consume while a higher-level candidate still reads the value),
//! then dispatches outputs: downstream values are delivered inside the same
//! cycle, upstream values are re-enqueued as fresh stimuli for a later cycle.
//! The cycle is quiescent when no link is ready or every evaluated link
//! suppressed its consume.
//!
//! ```text
//! stimulus ─ deliver ─▶ pending reactives ─▶ candidate links (lowest level)
//!                ▲                                   │ evaluate
//!                │ upstream values,                  ▼ consume once
//!                │ overflow retries,           outcomes ─▶ downstream
//!                │ async results                     │ deliveries
//!                └────────── new stimuli ◀───────────┘ graph edits,
//!                                                      alive counters
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::executor::Executor;
use crate::link::{Link, LinkFilter, LinkId, LinkInput, Outcome};
use crate::netref::{with_netref, NetworkRef, Stimulus};
use crate::network::{Level, Network, ReactiveId};
use crate::reactive::{reactive_ptr, DeliverError, Reactive, SharedReactive};
use crate::value::Occurrence;

/// Per-cycle bookkeeping. Reset for every stimulus.
#[derive(Default)]
struct Cycle {
    /// Reactives completed this cycle whose complete_fns have not fired yet.
    completed: Vec<SharedReactive>,
    /// Identity of every reactive recorded as completed this cycle, so the
    /// completion hooks fire at most once.
    completed_seen: HashSet<usize>,
    /// Pending alive-counter raises.
    dont_complete: Vec<SharedReactive>,
    /// Pending alive-counter releases.
    allow_complete: Vec<SharedReactive>,
    /// Ready candidates above the current level, carried to the next round.
    pending_links: Vec<Arc<Link>>,
    /// Links already evaluated this cycle. An entry is cleared when one of
    /// the link's inputs is consumed or receives a new value, so a deferred
    /// consume does not re-run a link on the value it already saw.
    evaluated: HashSet<LinkId>,
}

impl Cycle {
    fn record_completed(&mut self, reactive: &SharedReactive) {
        if self.completed_seen.insert(reactive_ptr(reactive)) {
            self.completed.push(reactive.clone());
        }
    }

    fn rearm_dependents(&mut self, network: &Network, reactive: &SharedReactive) {
        if let Some(rid) = network.reactive_id(reactive) {
            for link in network.dependent_links(rid) {
                self.evaluated.remove(&link.id());
            }
        }
    }
}

/// Run one stimulus against the network to a quiescent state.
pub(crate) fn run_stimulus(network: &mut Network, stimulus: Stimulus, netref: &NetworkRef) {
    let Stimulus {
        deliveries,
        outcomes,
        exec,
    } = stimulus;
    let mut cycle = Cycle::default();

    if let Some(exec) = exec {
        exec(network);
    }

    for (target, occurrence) in deliveries {
        deliver(network, &mut cycle, netref, &target, occurrence);
    }

    // Fold in outcomes carried by the stimulus (graph edits, async results)
    // as if a link had just produced them. There is no link context here, so
    // nothing is deferred upstream.
    let seeded: Vec<(Option<Arc<Link>>, Outcome)> =
        outcomes.into_iter().map(|outcome| (None, outcome)).collect();
    apply_outcomes(network, &mut cycle, netref, seeded, 0, false);

    run_cycle(network, &mut cycle, netref);

    network.maybe_rebuild();
}

fn run_cycle(network: &mut Network, cycle: &mut Cycle, netref: &NetworkRef) {
    loop {
        // Candidates: links carried from the previous round plus the fan-out
        // of every pending reactive, filtered to ready and live, sorted by
        // level with the link id as tie-break.
        let mut candidates = std::mem::take(&mut cycle.pending_links);
        for (rid, _) in network.pending_reactives() {
            candidates.extend(network.dependent_links(rid));
        }
        candidates.sort_by_key(|link| {
            (
                network.link_level(link).unwrap_or(Level::MAX),
                link.id(),
            )
        });
        candidates.dedup_by_key(|link| link.id());
        candidates.retain(|link| {
            network.contains_link(link.id())
                && !cycle.evaluated.contains(&link.id())
                && link.ready()
                && !link.dead()
        });
        if candidates.is_empty() {
            break;
        }

        // Lowest level evaluates now; everything above waits.
        let current_level = network.link_level(&candidates[0]).unwrap_or(0);
        let split = candidates
            .iter()
            .position(|link| network.link_level(link).unwrap_or(Level::MAX) != current_level)
            .unwrap_or(candidates.len());
        let mut current_links = candidates;
        cycle.pending_links = current_links.split_off(split);

        // Shared peek of the round's input values: one peek per reactive,
        // every sibling link sees the same occurrence.
        let mut rvt_map: HashMap<ReactiveId, Occurrence> = HashMap::new();
        for link in &current_links {
            for input in &link.inputs {
                let Some(rid) = network.reactive_id(input) else {
                    continue;
                };
                if !rvt_map.contains_key(&rid) {
                    if let Some(occurrence) = input.next_value() {
                        rvt_map.insert(rid, occurrence);
                    }
                }
            }
        }

        let mut evaluated: Vec<(Arc<Link>, Outcome)> = Vec::new();
        for link in current_links {
            let input = link_input(network, &link, &rvt_map);
            cycle.evaluated.insert(link.id());
            let outcome = match link.executor.clone() {
                Some(executor) => spawn_async(netref, &link, input, executor),
                None => eval_link(&link, &input).unwrap_or_default(),
            };
            evaluated.push((link, outcome));
        }

        // Consume stage: at most one consume per reactive per round, and a
        // value still needed by a not-yet-evaluated higher-level candidate
        // stays put until that link has run.
        let deferred: HashSet<ReactiveId> = cycle
            .pending_links
            .iter()
            .flat_map(|link| link.inputs.iter())
            .filter_map(|input| network.reactive_id(input))
            .collect();
        let mut consumed: HashSet<ReactiveId> = HashSet::new();
        for (link, outcome) in &evaluated {
            if outcome.no_consume {
                continue;
            }
            for input in &link.inputs {
                let Some(rid) = network.reactive_id(input) else {
                    continue;
                };
                if deferred.contains(&rid) || !consumed.insert(rid) {
                    continue;
                }
                input.consume();
            }
        }
        for rid in &consumed {
            if let Some(reactive) = network.reactive_by_id(*rid) {
                cycle.rearm_dependents(network, &reactive);
            }
        }

        let quiescent = evaluated.iter().all(|(_, outcome)| outcome.no_consume);

        let items: Vec<(Option<Arc<Link>>, Outcome)> = evaluated
            .into_iter()
            .map(|(link, outcome)| (Some(link), outcome))
            .collect();
        apply_outcomes(network, cycle, netref, items, current_level, true);

        if quiescent {
            break;
        }
    }
}

/// Dispatch outcome outputs, fire completion hooks, apply graph edits and
/// alive counters. Loops until the completion cascade settles: firing a
/// complete_fn or auto-completing a reactive can produce further outcomes.
fn apply_outcomes(
    network: &mut Network,
    cycle: &mut Cycle,
    netref: &NetworkRef,
    items: Vec<(Option<Arc<Link>>, Outcome)>,
    current_level: Level,
    defer_upstream: bool,
) {
    let mut items = items;
    loop {
        let mut removals: Vec<LinkFilter> = Vec::new();
        let mut additions: Vec<Link> = Vec::new();

        // Completion hooks first: every link reading a just-completed
        // reactive gets its complete_fn called, and the returned outcomes
        // join this pass. Their graph edits (say, a replacement link that
        // takes over a hand-off reactive) must land before the removal
        // sweep's alive-counter releases are applied below, or the hand-off
        // reactive would auto-complete in the gap.
        let completed_now = std::mem::take(&mut cycle.completed);
        for reactive in &completed_now {
            if let Some(rid) = network.reactive_id(reactive) {
                for link in network.dependent_links(rid) {
                    if let Some(complete_fn) = &link.complete_fn {
                        if let Some(outcome) = complete_fn(&link, reactive) {
                            items.push((Some(link.clone()), outcome));
                        }
                    }
                }
            }
        }

        for (source, outcome) in items.drain(..) {
            if let Some(error) = &outcome.error {
                let label = source
                    .as_ref()
                    .map(|link| link.label.as_ref())
                    .unwrap_or("<stimulus>");
                tracing::error!(link = label, %error, "outcome carried an error");
            }

            for (target, occurrence) in outcome.output_occurrences {
                // A completion aimed at a reactive goes through the alive
                // counter rather than being delivered outright.
                if occurrence.value.is_completed() {
                    cycle.allow_complete.push(target);
                    continue;
                }
                let level = network.reactive_level(&target);
                let upstream = defer_upstream && level.map_or(true, |l| l <= current_level);
                if upstream {
                    tracing::debug!(
                        reactive = target.label(),
                        "value crosses upstream; deferred to a later cycle"
                    );
                    netref.enqueue(Stimulus::delivery(target, occurrence));
                } else {
                    deliver(network, cycle, netref, &target, occurrence);
                }
            }

            if let Some(filter) = outcome.remove_by {
                removals.push(filter);
            }
            additions.extend(outcome.add);
            cycle.dont_complete.extend(outcome.dont_complete);
            cycle.allow_complete.extend(outcome.allow_complete);
        }

        // Graph edits: drop matched and dead links, then splice in additions.
        let removed = network.remove_links(|link| {
            removals.iter().any(|filter| filter(link)) || link.dead()
        });
        for link in &removed {
            cycle
                .allow_complete
                .extend(link.complete_on_remove.iter().cloned());
            cycle.evaluated.remove(&link.id());
        }
        for link in additions {
            network.add_link(link);
        }

        // Alive counters; a reactive reaching zero is auto-completed.
        for reactive in std::mem::take(&mut cycle.dont_complete) {
            network.bump_alive(&reactive, 1);
        }
        for reactive in std::mem::take(&mut cycle.allow_complete) {
            if network.bump_alive(&reactive, -1) == Some(0) {
                tracing::debug!(
                    reactive = reactive.label(),
                    "alive counter reached zero; auto-completing"
                );
                deliver(network, cycle, netref, &reactive, Occurrence::completed());
            }
        }

        if items.is_empty() && cycle.completed.is_empty() {
            break;
        }
    }
}

/// Deliver one occurrence, realizing the error policy: overflow re-enqueues
/// the delivery as a fresh stimulus, delivery to a completed reactive is
/// logged and dropped (completion itself is idempotent), anything else is a
/// programmer error logged at warn.
fn deliver(
    network: &mut Network,
    cycle: &mut Cycle,
    netref: &NetworkRef,
    target: &SharedReactive,
    occurrence: Occurrence,
) {
    let completing = occurrence.value.is_completed();
    let was_completed = target.completed();
    if was_completed && !completing {
        tracing::warn!(
            reactive = target.label(),
            "dropping delivery to completed reactive"
        );
        return;
    }
    match target.deliver(occurrence.clone()) {
        Ok(_) => {
            if completing {
                if !was_completed {
                    cycle.record_completed(target);
                }
            } else {
                // A fresh value re-arms links already evaluated this cycle.
                cycle.rearm_dependents(network, target);
            }
        }
        Err(DeliverError::Overflow { capacity }) => {
            tracing::debug!(
                reactive = target.label(),
                capacity,
                "queue full; delivery re-enqueued"
            );
            netref.enqueue(Stimulus::delivery(target.clone(), occurrence));
        }
        Err(DeliverError::Completed) => {
            tracing::warn!(
                reactive = target.label(),
                "dropping delivery to completed reactive"
            );
        }
        Err(error) => {
            tracing::warn!(reactive = target.label(), %error, "delivery failed");
        }
    }
}

/// Evaluate a link synchronously, catching a failed evaluation: the error is
/// routed through the link's error_fn when present, otherwise surfaced to
/// the error sink. The link itself is never removed for failing.
fn eval_link(link: &Link, input: &LinkInput) -> Option<Outcome> {
    match (link.link_fn)(input) {
        Ok(outcome) => outcome,
        Err(error) => match &link.error_fn {
            Some(error_fn) => error_fn(&error, input),
            None => {
                tracing::error!(link = %link.label, error = %error, "link fn failed");
                None
            }
        },
    }
}

/// Hand a link evaluation to its executor. The returned placeholder keeps
/// the outputs alive across the round trip; the executor's follow-up
/// stimulus carries the real outcome plus the matching releases.
fn spawn_async(
    netref: &NetworkRef,
    link: &Arc<Link>,
    input: LinkInput,
    executor: Arc<dyn Executor>,
) -> Outcome {
    let placeholder = Outcome {
        dont_complete: input.output_reactives.clone(),
        ..Outcome::default()
    };
    let task_link = link.clone();
    let task_netref = netref.clone();
    executor.execute(Box::new(move || {
        let outputs = input.output_reactives.clone();
        let mut outcome =
            with_netref(&task_netref, || eval_link(&task_link, &input)).unwrap_or_default();
        outcome.allow_complete.extend(outputs);
        task_netref.enqueue(Stimulus::outcome(outcome));
    }));
    placeholder
}

/// Assemble the input-side view for one link from the round's shared peek.
fn link_input(
    network: &Network,
    link: &Link,
    rvt_map: &HashMap<ReactiveId, Occurrence>,
) -> LinkInput {
    let input_occurrences = link
        .inputs
        .iter()
        .filter_map(|input| {
            let rid = network.reactive_id(input)?;
            let occurrence = rvt_map.get(&rid)?;
            Some((input.clone(), occurrence.clone()))
        })
        .collect();
    LinkInput {
        label: link.label.clone(),
        input_occurrences,
        output_reactives: link.live_outputs(),
    }
}
