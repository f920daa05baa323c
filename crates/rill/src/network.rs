use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::link::{ErrorFn, Link, LinkId};
use crate::reactive::{reactive_ptr, same_reactive, Reactive, SharedReactive, WeakReactive};

/// Stable integer id the network assigns to each tracked reactive.
pub type ReactiveId = u64;

/// Topological rank. Links evaluate strictly in ascending level; a link sits
/// above its highest input and below all of its outputs.
pub type Level = u64;

/// Key into the level map: both reactives and links are ranked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LevelKey {
    Reactive(ReactiveId),
    Link(LinkId),
}

/// Removed-link count that triggers a full index rebuild.
pub const REBUILD_THRESHOLD: usize = 100;

/// The graph of links plus its derived indices.
///
/// The network exclusively owns the link set and indices; reactives are
/// shared with user code. References to reactives are weak wherever the
/// network holds them on its own behalf, so user-abandoned derived reactives
/// become collectable and their links prunable.
pub struct Network {
    pub id: String,
    links: Vec<Arc<Link>>,
    /// Thin data pointer → id. Pointer keys are validated against the weak
    /// table on lookup, so a reallocation at a stale address cannot alias.
    rid_map: HashMap<usize, ReactiveId>,
    reactives: HashMap<ReactiveId, WeakReactive>,
    level_map: HashMap<LevelKey, Level>,
    /// Forward fan-out: reactive id → links it feeds.
    links_map: HashMap<ReactiveId, Vec<Arc<Link>>>,
    /// Alive counters; a reactive reaching zero is auto-completed.
    alive_map: HashMap<ReactiveId, i64>,
    removes: usize,
    next_rid: ReactiveId,
}

impl Network {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            links: Vec::new(),
            rid_map: HashMap::new(),
            reactives: HashMap::new(),
            level_map: HashMap::new(),
            links_map: HashMap::new(),
            alive_map: HashMap::new(),
            removes: 0,
            next_rid: 1,
        }
    }

    pub fn with_links(id: impl Into<String>, links: Vec<Link>) -> Self {
        let mut network = Self::new(id);
        for link in links {
            network.add_link(link);
        }
        network
    }

    pub fn links(&self) -> &[Arc<Link>] {
        &self.links
    }

    pub fn contains_link(&self, id: LinkId) -> bool {
        self.links.iter().any(|link| link.id() == id)
    }

    /// Assign (or look up) the id of a reactive. Returns `(id, newly_seen)`.
    fn ensure_id(&mut self, reactive: &SharedReactive) -> (ReactiveId, bool) {
        let ptr = reactive_ptr(reactive);
        if let Some(&rid) = self.rid_map.get(&ptr) {
            // Guard against pointer reuse after the old reactive was dropped.
            let alive = self
                .reactives
                .get(&rid)
                .and_then(WeakReactive::upgrade)
                .map(|existing| same_reactive(&existing, reactive))
                .unwrap_or(false);
            if alive {
                return (rid, false);
            }
            self.forget(rid);
        }
        let rid = self.next_rid;
        self.next_rid += 1;
        self.rid_map.insert(ptr, rid);
        self.reactives.insert(rid, Arc::downgrade(reactive));
        (rid, true)
    }

    fn forget(&mut self, rid: ReactiveId) {
        self.reactives.remove(&rid);
        self.level_map.remove(&LevelKey::Reactive(rid));
        self.links_map.remove(&rid);
        self.alive_map.remove(&rid);
        self.rid_map.retain(|_, id| *id != rid);
    }

    pub fn reactive_id(&self, reactive: &SharedReactive) -> Option<ReactiveId> {
        self.rid_map.get(&reactive_ptr(reactive)).copied()
    }

    pub fn reactive_by_id(&self, rid: ReactiveId) -> Option<SharedReactive> {
        self.reactives.get(&rid).and_then(WeakReactive::upgrade)
    }

    pub fn reactive_level(&self, reactive: &SharedReactive) -> Option<Level> {
        let rid = self.reactive_id(reactive)?;
        self.level_map.get(&LevelKey::Reactive(rid)).copied()
    }

    pub fn link_level(&self, link: &Link) -> Option<Level> {
        self.level_map.get(&LevelKey::Link(link.id())).copied()
    }

    /// Links for which the given reactive is an input.
    pub fn dependent_links(&self, rid: ReactiveId) -> Vec<Arc<Link>> {
        self.links_map.get(&rid).cloned().unwrap_or_default()
    }

    /// All tracked reactives that currently report `pending()`.
    pub fn pending_reactives(&self) -> Vec<(ReactiveId, SharedReactive)> {
        self.reactives
            .iter()
            .filter_map(|(&rid, weak)| weak.upgrade().map(|r| (rid, r)))
            .filter(|(_, r)| r.pending())
            .collect()
    }

    /// Splice a link into the graph, maintaining every derived index.
    pub fn add_link(&mut self, link: Link) -> Arc<Link> {
        let link = Arc::new(link);

        // Track every referenced reactive and seed alive counters for the
        // newly observed ones (the creator's implicit hold).
        let mut newly_seen: HashSet<ReactiveId> = HashSet::new();
        for input in &link.inputs {
            self.track(input, &mut newly_seen);
        }
        for output in link.live_outputs() {
            self.track(&output, &mut newly_seen);
        }
        for declared in &link.complete_on_remove {
            let rid = self.track(declared, &mut newly_seen);
            // An additional link declaring an already-tracked reactive adds
            // its own hold; the first declaration coincides with the seed.
            if !newly_seen.contains(&rid) {
                *self.alive_map.entry(rid).or_insert(1) += 1;
            }
        }

        self.index_link(link.clone());
        tracing::debug!(
            network = %self.id,
            link = %link.label,
            level = ?self.link_level(&link),
            "link added"
        );
        link
    }

    fn track(
        &mut self,
        reactive: &SharedReactive,
        newly_seen: &mut HashSet<ReactiveId>,
    ) -> ReactiveId {
        let (rid, new) = self.ensure_id(reactive);
        if new {
            self.alive_map.insert(rid, 1);
            newly_seen.insert(rid);
        }
        rid
    }

    /// Rebuild-safe indexing: levels, fan-out map, link list, downstream walk.
    fn index_link(&mut self, link: Arc<Link>) {
        let mut max_input_level = 0;
        for input in &link.inputs {
            let (rid, _) = self.ensure_id(input);
            // Previously unknown input reactives start at level 1.
            let level = *self
                .level_map
                .entry(LevelKey::Reactive(rid))
                .or_insert(1);
            max_input_level = max_input_level.max(level);
            let fan_out = self.links_map.entry(rid).or_default();
            if !fan_out.iter().any(|l| l.id() == link.id()) {
                fan_out.push(link.clone());
            }
        }
        self.level_map
            .insert(LevelKey::Link(link.id()), max_input_level + 1);
        self.links.push(link.clone());
        self.bump_downstream(&link);
    }

    /// Walk downstream breadth-first from the link's outputs, raising levels
    /// until `level(link) > level(inputs)` and `level(output) > level(link)`
    /// hold everywhere. The walk alternates reactives and links; a visit cap
    /// stops runaway walks should the graph contain a cycle (unsupported,
    /// layering is undefined in that case).
    fn bump_downstream(&mut self, start: &Arc<Link>) {
        // A link re-enters the queue only when its level was raised, and in a
        // DAG a level cannot exceed twice the link count plus the seed, so
        // this cap is only reachable through a cycle.
        let visit_cap = 2 * self.links.len() + 8;
        let mut visits: HashMap<LinkId, usize> = HashMap::new();
        let mut queue: VecDeque<Arc<Link>> = VecDeque::new();
        queue.push_back(start.clone());

        while let Some(link) = queue.pop_front() {
            let visit = visits.entry(link.id()).or_insert(0);
            *visit += 1;
            if *visit > visit_cap {
                tracing::warn!(
                    network = %self.id,
                    link = %link.label,
                    "level walk exceeded visit cap; graph contains a cycle"
                );
                continue;
            }

            let link_level = *self
                .level_map
                .get(&LevelKey::Link(link.id()))
                .unwrap_or(&1);
            for output in link.live_outputs() {
                let (rid, _) = self.ensure_id(&output);
                let entry = self
                    .level_map
                    .entry(LevelKey::Reactive(rid))
                    .or_insert(0);
                if *entry <= link_level {
                    *entry = link_level + 1;
                }
                let output_level = *entry;
                for dependent in self.dependent_links(rid) {
                    let level = self
                        .level_map
                        .entry(LevelKey::Link(dependent.id()))
                        .or_insert(0);
                    if *level <= output_level {
                        *level = output_level + 1;
                        queue.push_back(dependent);
                    }
                }
            }
        }
    }

    /// Remove every link matching the predicate. Returns the removed links so
    /// the engine can deposit their `complete_on_remove` declarations.
    pub fn remove_links(&mut self, predicate: impl Fn(&Link) -> bool) -> Vec<Arc<Link>> {
        let mut removed = Vec::new();
        self.links.retain(|link| {
            if predicate(link) {
                removed.push(link.clone());
                false
            } else {
                true
            }
        });
        for link in &removed {
            for input in &link.inputs {
                if let Some(rid) = self.reactive_id(input) {
                    if let Some(fan_out) = self.links_map.get_mut(&rid) {
                        fan_out.retain(|l| l.id() != link.id());
                    }
                }
            }
            tracing::debug!(network = %self.id, link = %link.label, "link removed");
        }
        self.removes += removed.len();
        removed
    }

    /// Replace a link in place (same id, same levels). Used for atomic
    /// reconfigurations such as attaching an error handler.
    fn replace_link(&mut self, replacement: Arc<Link>) {
        let id = replacement.id();
        for slot in self.links.iter_mut() {
            if slot.id() == id {
                *slot = replacement.clone();
            }
        }
        for fan_out in self.links_map.values_mut() {
            for slot in fan_out.iter_mut() {
                if slot.id() == id {
                    *slot = replacement.clone();
                }
            }
        }
    }

    /// Attach an error handler to the link whose sole output is `target`.
    /// Returns false when no such link exists.
    pub fn attach_error_fn(&mut self, target: &SharedReactive, error_fn: ErrorFn) -> bool {
        let found = self
            .links
            .iter()
            .find(|link| {
                let outputs = link.live_outputs();
                outputs.len() == 1 && same_reactive(&outputs[0], target)
            })
            .cloned();
        match found {
            Some(link) => {
                let replacement = Arc::new(link.with_replaced_error_fn(error_fn));
                self.replace_link(replacement);
                true
            }
            None => {
                tracing::warn!(
                    network = %self.id,
                    reactive = target.label(),
                    "on_error: no link with this sole output"
                );
                false
            }
        }
    }

    /// Adjust a reactive's alive counter by `delta`, returning the new count.
    /// Untracked reactives are ignored (returns `None`).
    pub fn bump_alive(&mut self, reactive: &SharedReactive, delta: i64) -> Option<i64> {
        let rid = self.reactive_id(reactive)?;
        let counter = self.alive_map.entry(rid).or_insert(1);
        *counter += delta;
        Some(*counter)
    }

    pub fn alive_count(&self, reactive: &SharedReactive) -> Option<i64> {
        let rid = self.reactive_id(reactive)?;
        self.alive_map.get(&rid).copied()
    }

    /// Whether enough links were removed to warrant recomputing the indices.
    pub fn maybe_rebuild(&mut self) {
        if self.removes > REBUILD_THRESHOLD {
            self.rebuild();
        }
    }

    /// Recompute level and fan-out indices from the current link list and
    /// prune entries for collected reactives. Alive counters persist.
    pub fn rebuild(&mut self) {
        tracing::debug!(network = %self.id, links = self.links.len(), "rebuilding indices");
        let links = std::mem::take(&mut self.links);
        self.level_map.clear();
        self.links_map.clear();
        self.removes = 0;

        let dead: Vec<ReactiveId> = self
            .reactives
            .iter()
            .filter(|(_, weak)| weak.upgrade().is_none())
            .map(|(&rid, _)| rid)
            .collect();
        for rid in dead {
            self.forget(rid);
        }

        for link in links {
            self.index_link(link);
        }
    }

    #[cfg(test)]
    pub(crate) fn removed_since_rebuild(&self) -> usize {
        self.removes
    }
}
