use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Instant;

use tracing::{debug, error, trace};

use crate::clock::{Clock, LamportClock};
use crate::config::TreeConfig;
use crate::error::{Error, Result};
use crate::events::{Listeners, SubscriptionId, VertexEvent};
use crate::ids::{Lamport, OperationId, ReplicaId, VertexId};
use crate::ops::{MoveOp, Operation, PropertyOp, PropertyValue};
use crate::state::TreeState;
use crate::vertex::{VertexMut, VertexRef};

/// Property key holding a vertex's name for path lookups.
pub const NAME_KEY: &str = "_n";

#[derive(Clone, Debug)]
struct LogEntry {
    op: MoveOp,
    /// Parent of the target right before the latest placement attempt of `op`.
    /// `None` means the target did not exist yet, so undo leaves it in place.
    prev_parent: Option<Option<VertexId>>,
}

impl LogEntry {
    fn new(op: MoveOp) -> Self {
        Self {
            op,
            prev_parent: None,
        }
    }
}

/// A replicated tree of vertices with properties.
///
/// Structure is a move-operation CRDT: every replica keeps the move log sorted by
/// [`OperationId`] and resolves late arrivals by undoing newer moves, applying the
/// late one, and redoing the rest. Moves that would make a vertex its own ancestor
/// are skipped identically everywhere. Properties are last-writer-wins registers per
/// `(vertex, key)`.
///
/// Convergence assumes Lamport-consistent histories: an operation's id is larger than
/// the id of every operation its author had seen when issuing it. Ids minted by
/// [`LamportClock`] always satisfy this. Undoing the entry that first placed a vertex
/// leaves the vertex where it is, so hand-built logs that reference a vertex under an
/// id older than its creation can settle differently depending on delivery order.
pub struct ReplicatedTree<C: Clock = LamportClock> {
    replica_id: ReplicaId,
    root_id: VertexId,
    clock: C,
    config: TreeConfig,
    state: TreeState,
    log: Vec<LogEntry>, // ordered by op id
    property_ops: Vec<PropertyOp>,
    property_writers: HashMap<(VertexId, String), OperationId>,
    applied: HashSet<OperationId>,
    local_ops: Vec<Operation>,
    pending_moves: HashMap<VertexId, Vec<MoveOp>>,
    pending_properties: HashMap<VertexId, Vec<PropertyOp>>,
    listeners: Listeners,
    last_flush: Option<Instant>,
}

impl ReplicatedTree {
    /// Start a fresh tree with a new root vertex.
    pub fn new(replica_id: impl Into<ReplicaId>) -> Self {
        Self::with_config(replica_id, TreeConfig::default())
    }

    pub fn with_config(replica_id: impl Into<ReplicaId>, config: TreeConfig) -> Self {
        Self::with_clock(replica_id, LamportClock::default(), config)
    }

    /// Rebuild a tree from a previously persisted or replicated operation log.
    pub fn from_operations(replica_id: impl Into<ReplicaId>, ops: &[Operation]) -> Result<Self> {
        Self::from_operations_with(replica_id, LamportClock::default(), TreeConfig::default(), ops)
    }
}

impl<C: Clock> ReplicatedTree<C> {
    pub fn with_clock(replica_id: impl Into<ReplicaId>, clock: C, config: TreeConfig) -> Self {
        let mut tree = Self::empty(replica_id.into(), VertexId::random(), clock, config);
        let root = tree.root_id.clone();
        tree.local_move(root, None);
        tree.ensure_trash();
        tree.state.events.drain();
        tree
    }

    pub fn from_operations_with(
        replica_id: impl Into<ReplicaId>,
        clock: C,
        config: TreeConfig,
        ops: &[Operation],
    ) -> Result<Self> {
        let root = ops
            .iter()
            .find_map(|op| match op {
                Operation::Move(m) if m.parent.is_none() && !m.target.is_trash() => {
                    Some(m.target.clone())
                }
                _ => None,
            })
            .ok_or(Error::MissingRoot)?;

        let mut tree = Self::empty(replica_id.into(), root, clock, config);
        tree.merge(ops);
        tree.ensure_trash();
        tree.state.events.drain();
        Ok(tree)
    }

    fn empty(replica_id: ReplicaId, root_id: VertexId, clock: C, config: TreeConfig) -> Self {
        Self {
            replica_id,
            root_id,
            clock,
            config,
            state: TreeState::default(),
            log: Vec::new(),
            property_ops: Vec::new(),
            property_writers: HashMap::new(),
            applied: HashSet::new(),
            local_ops: Vec::new(),
            pending_moves: HashMap::new(),
            pending_properties: HashMap::new(),
            listeners: Listeners::default(),
            last_flush: None,
        }
    }

    fn ensure_trash(&mut self) {
        let trash = VertexId::trash();
        if !self.state.contains(&trash) {
            self.local_move(trash, None);
        }
    }

    pub fn replica_id(&self) -> &ReplicaId {
        &self.replica_id
    }

    pub fn root_id(&self) -> &VertexId {
        &self.root_id
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Current Lamport time as observed by this replica.
    pub fn lamport(&self) -> Lamport {
        self.clock.now()
    }

    // ----- local mutation -----

    /// Create a vertex with a fresh id under `parent` and return its id.
    pub fn new_vertex(&mut self, parent: &VertexId) -> VertexId {
        self.new_vertex_with_id(VertexId::random(), parent)
    }

    /// Create a vertex under `parent` and give it initial properties, one operation per key.
    pub fn new_vertex_with<K, V>(
        &mut self,
        parent: &VertexId,
        props: impl IntoIterator<Item = (K, V)>,
    ) -> VertexId
    where
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        let id = self.new_vertex(parent);
        self.set_properties(&id, props);
        id
    }

    /// Create a vertex whose name can be used by [`ReplicatedTree::vertex_by_path`].
    pub fn new_named_vertex<K, V>(
        &mut self,
        parent: &VertexId,
        name: &str,
        props: impl IntoIterator<Item = (K, V)>,
    ) -> VertexId
    where
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        let id = self.new_vertex_with(parent, props);
        self.set_property(&id, NAME_KEY, name);
        id
    }

    /// Create a vertex with a caller-chosen id. Creation is a move of a fresh id.
    pub fn new_vertex_with_id(&mut self, id: VertexId, parent: &VertexId) -> VertexId {
        self.local_move(id.clone(), Some(parent.clone()));
        id
    }

    pub fn move_vertex(&mut self, id: &VertexId, new_parent: &VertexId) {
        self.local_move(id.clone(), Some(new_parent.clone()));
    }

    /// Move the vertex under the trash vertex.
    pub fn delete_vertex(&mut self, id: &VertexId) {
        self.local_move(id.clone(), Some(VertexId::trash()));
    }

    pub fn set_property(
        &mut self,
        id: &VertexId,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) {
        self.write_property(id, key, Some(value.into()));
    }

    pub fn clear_property(&mut self, id: &VertexId, key: impl Into<String>) {
        self.write_property(id, key, None);
    }

    pub fn set_properties<K, V>(&mut self, id: &VertexId, props: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        for (key, value) in props {
            self.set_property(id, key, value);
        }
    }

    /// Durable property write; `None` clears the key.
    pub fn write_property(
        &mut self,
        id: &VertexId,
        key: impl Into<String>,
        value: Option<PropertyValue>,
    ) {
        let op = PropertyOp {
            id: self.next_op_id(),
            target: id.clone(),
            key: key.into(),
            value,
        };
        self.local_ops.push(Operation::SetProperty(op.clone()));
        self.apply_property(op);
    }

    /// Local-only value that shadows the durable one on read. Never replicated.
    /// Ignored when the vertex does not exist.
    pub fn set_transient_property(
        &mut self,
        id: &VertexId,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) {
        self.write_transient_property(id, key, Some(value.into()));
    }

    pub fn clear_transient_property(&mut self, id: &VertexId, key: impl Into<String>) {
        self.write_transient_property(id, key, None);
    }

    pub fn write_transient_property(
        &mut self,
        id: &VertexId,
        key: impl Into<String>,
        value: Option<PropertyValue>,
    ) {
        let stamp = self.clock.now();
        self.state
            .set_transient_property(id, &key.into(), value, stamp);
    }

    /// Operations generated locally since the previous call.
    pub fn drain_local_operations(&mut self) -> Vec<Operation> {
        std::mem::take(&mut self.local_ops)
    }

    /// Apply a batch of operations from another replica. Order and duplicates do not matter.
    pub fn merge(&mut self, ops: &[Operation]) {
        for op in ops {
            if self.applied.contains(op.id()) {
                continue;
            }
            match op {
                Operation::Move(op) => self.apply_move(op.clone()),
                Operation::SetProperty(op) => self.apply_property(op.clone()),
            }
        }
    }

    fn next_op_id(&mut self) -> OperationId {
        let counter = self.clock.tick();
        OperationId::new(&self.replica_id, counter)
    }

    fn local_move(&mut self, target: VertexId, parent: Option<VertexId>) {
        let op = MoveOp {
            id: self.next_op_id(),
            target,
            parent,
        };
        self.local_ops.push(Operation::Move(op.clone()));
        self.apply_move(op);
    }

    // ----- structural merge -----

    fn apply_move(&mut self, op: MoveOp) {
        if self.applied.contains(&op.id) {
            return;
        }

        if let Some(parent) = &op.parent {
            if !self.state.contains(parent) {
                debug!(op = %op.id, parent = %parent, "move waits for its parent");
                self.pending_moves.entry(parent.clone()).or_default().push(op);
                return;
            }
        }

        self.clock.observe(op.id.counter);
        let target = op.target.clone();

        let is_newest = self.log.last().map_or(true, |last| op.id > last.op.id);
        if is_newest {
            self.mark_applied(&op.id, || Operation::Move(op.clone()));
            self.log.push(LogEntry::new(op));
            self.try_place(self.log.len() - 1);
        } else {
            // Undo every move not older than `op`, newest first.
            let mut idx = self.log.len();
            while idx > 0 && self.log[idx - 1].op.id >= op.id {
                idx -= 1;
                self.undo(idx);
            }
            trace!(op = %op.id, undone = self.log.len() - idx, "late move spliced into log");

            self.mark_applied(&op.id, || Operation::Move(op.clone()));
            self.log.insert(idx, LogEntry::new(op));
            self.try_place(idx);
            for redo in idx + 1..self.log.len() {
                self.try_place(redo);
            }
        }

        self.drain_pending_moves(&target);
    }

    fn mark_applied(&mut self, id: &OperationId, op: impl FnOnce() -> Operation) {
        self.applied.insert(id.clone());
        if self.listeners.has_applied_observers() {
            self.listeners.report_applied(&op());
        }
    }

    /// Apply the move at `idx` unless it targets itself or would create a cycle.
    fn try_place(&mut self, idx: usize) {
        let target = self.log[idx].op.target.clone();
        let parent = self.log[idx].op.parent.clone();

        let prev_parent = self.state.get(&target).map(|v| v.parent.clone());
        let created = prev_parent.is_none();
        self.log[idx].prev_parent = prev_parent;

        if parent.as_ref() == Some(&target) {
            return;
        }
        if let Some(parent) = &parent {
            if self.is_ancestor(parent, &target) {
                return;
            }
        }

        self.state.move_vertex(&target, parent.as_ref());

        if created {
            self.drain_pending_properties(&target);
        }
    }

    fn undo(&mut self, idx: usize) {
        let entry = &self.log[idx];
        let Some(prev_parent) = entry.prev_parent.clone() else {
            return;
        };
        let target = entry.op.target.clone();
        if !self.state.contains(&target) {
            error!(
                op = %entry.op.id,
                vertex = %target,
                "cannot undo move: target vertex not found"
            );
            return;
        }
        self.state.move_vertex(&target, prev_parent.as_ref());
    }

    fn drain_pending_moves(&mut self, parent: &VertexId) {
        if !self.state.contains(parent) {
            return;
        }
        // Remove the bucket first so ops that block again re-enqueue cleanly.
        let Some(ops) = self.pending_moves.remove(parent) else {
            return;
        };
        debug!(parent = %parent, count = ops.len(), "replaying moves that waited for parent");
        for op in ops {
            self.apply_move(op);
        }
    }

    // ----- property merge -----

    fn apply_property(&mut self, op: PropertyOp) {
        if self.applied.contains(&op.id) {
            return;
        }

        if !self.state.contains(&op.target) {
            debug!(op = %op.id, vertex = %op.target, "property write waits for its vertex");
            self.pending_properties
                .entry(op.target.clone())
                .or_default()
                .push(op);
            return;
        }

        self.clock.observe(op.id.counter);
        self.mark_applied(&op.id, || Operation::SetProperty(op.clone()));

        self.state
            .expire_transient(&op.target, &op.key, op.id.counter);

        let writer_key = (op.target.clone(), op.key.clone());
        let is_newer = self
            .property_writers
            .get(&writer_key)
            .map_or(true, |prev| op.id > *prev);
        if is_newer {
            self.state
                .set_property(&op.target, &op.key, op.value.clone());
            self.property_writers.insert(writer_key, op.id.clone());
        }
        self.property_ops.push(op);
    }

    fn drain_pending_properties(&mut self, target: &VertexId) {
        let Some(ops) = self.pending_properties.remove(target) else {
            return;
        };
        debug!(
            vertex = %target,
            count = ops.len(),
            "replaying property writes that waited for vertex"
        );
        for op in ops {
            self.apply_property(op);
        }
    }

    // ----- reads -----

    pub fn contains(&self, id: &VertexId) -> bool {
        self.state.contains(id)
    }

    pub fn vertex_count(&self) -> usize {
        self.state.len()
    }

    pub fn vertex(&self, id: &VertexId) -> Option<VertexRef<'_, C>> {
        self.state.contains(id).then(|| VertexRef::new(self, id.clone()))
    }

    pub fn vertex_mut(&mut self, id: &VertexId) -> Option<VertexMut<'_, C>> {
        if self.state.contains(id) {
            Some(VertexMut::new(self, id.clone()))
        } else {
            None
        }
    }

    pub fn root(&self) -> VertexRef<'_, C> {
        VertexRef::new(self, self.root_id.clone())
    }

    pub fn root_mut(&mut self) -> VertexMut<'_, C> {
        let root = self.root_id.clone();
        VertexMut::new(self, root)
    }

    pub fn all_vertices(&self) -> Vec<VertexRef<'_, C>> {
        self.state
            .iter()
            .map(|v| VertexRef::new(self, v.id.clone()))
            .collect()
    }

    pub fn parent_id(&self, id: &VertexId) -> Option<&VertexId> {
        self.state.parent_of(id)
    }

    pub fn parent(&self, id: &VertexId) -> Option<VertexRef<'_, C>> {
        self.parent_id(id).and_then(|p| self.vertex(p))
    }

    pub fn child_ids(&self, id: &VertexId) -> &[VertexId] {
        self.state.child_ids(id)
    }

    pub fn children(&self, id: &VertexId) -> Vec<VertexRef<'_, C>> {
        self.child_ids(id)
            .iter()
            .map(|c| VertexRef::new(self, c.clone()))
            .collect()
    }

    /// Ancestors from the direct parent up to the top of the tree.
    pub fn ancestors(&self, id: &VertexId) -> Vec<VertexRef<'_, C>> {
        let mut out = Vec::new();
        let mut current = self.parent_id(id);
        while let Some(parent) = current {
            if out.len() > self.config.max_depth {
                error!(
                    vertex = %id,
                    max_depth = self.config.max_depth,
                    "ancestor walk exceeded max depth"
                );
                break;
            }
            out.push(VertexRef::new(self, parent.clone()));
            current = self.parent_id(parent);
        }
        out
    }

    /// Whether `ancestor` is somewhere above `child`.
    pub fn is_ancestor(&self, child: &VertexId, ancestor: &VertexId) -> bool {
        let mut current = self.state.parent_of(child);
        let mut depth = 0;
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            if depth > self.config.max_depth {
                error!(
                    vertex = %child,
                    max_depth = self.config.max_depth,
                    "ancestor walk exceeded max depth, treating as cycle"
                );
                return true;
            }
            depth += 1;
            current = self.state.parent_of(id);
        }
        false
    }

    pub fn is_deleted(&self, id: &VertexId) -> bool {
        self.is_ancestor(id, &VertexId::trash())
    }

    /// Effective value: the transient value when set, otherwise the durable one.
    pub fn property(&self, id: &VertexId, key: &str) -> Option<&PropertyValue> {
        self.state.get(id).and_then(|v| v.property(key))
    }

    pub fn durable_property(&self, id: &VertexId, key: &str) -> Option<&PropertyValue> {
        self.state.get(id).and_then(|v| v.durable_property(key))
    }

    pub fn properties(&self, id: &VertexId) -> Vec<(&str, &PropertyValue)> {
        self.state
            .get(id)
            .map(|v| v.properties())
            .unwrap_or_default()
    }

    /// Resolve a `/`-separated path of vertex names starting below the root.
    pub fn vertex_by_path(&self, path: &str) -> Option<VertexRef<'_, C>> {
        let mut current = self.root_id.clone();
        for name in path.split('/').filter(|s| !s.is_empty()) {
            current = self
                .child_ids(&current)
                .iter()
                .find(|c| {
                    self.property(c, NAME_KEY)
                        .and_then(PropertyValue::as_str)
                        == Some(name)
                })?
                .clone();
        }
        self.vertex(&current)
    }

    pub fn move_operations(&self) -> impl Iterator<Item = &MoveOp> {
        self.log.iter().map(|entry| &entry.op)
    }

    /// Every applied operation: moves in log order, then property writes in arrival order.
    pub fn all_operations(&self) -> Vec<Operation> {
        self.log
            .iter()
            .map(|entry| Operation::Move(entry.op.clone()))
            .chain(self.property_ops.iter().cloned().map(Operation::SetProperty))
            .collect()
    }

    /// Operations still waiting on a missing parent or target vertex.
    pub fn pending_operation_count(&self) -> usize {
        self.pending_moves.values().map(Vec::len).sum::<usize>()
            + self.pending_properties.values().map(Vec::len).sum::<usize>()
    }

    // ----- notifications -----

    /// Listen to coalesced events for one vertex, or for every vertex when `vertex` is `None`.
    pub fn subscribe(
        &mut self,
        vertex: Option<&VertexId>,
        listener: impl FnMut(&VertexEvent) + 'static,
    ) -> SubscriptionId {
        self.listeners.subscribe(vertex.cloned(), Box::new(listener))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Hear every operation the moment it is applied, local or merged, in apply order.
    /// Buffered operations are reported when they are drained, never while they wait.
    /// Redelivered operations are not reported again.
    pub fn observe_applied(
        &mut self,
        listener: impl FnMut(&Operation) + 'static,
    ) -> SubscriptionId {
        self.listeners.observe_applied(Box::new(listener))
    }

    /// Same as [`unsubscribe`](Self::unsubscribe), named for symmetry with
    /// [`observe_applied`](Self::observe_applied).
    pub fn unobserve_applied(&mut self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Dispatch everything accumulated since the last flush. Returns the number of events sent.
    pub fn flush_events(&mut self) -> usize {
        let events = self.state.events.drain();
        self.listeners.dispatch(&events);
        events.len()
    }

    /// Flush when at least `notify_interval` has passed since the previous flush.
    /// Meant to be called from the owner's event loop on every tick.
    pub fn poll_events(&mut self, now: Instant) -> usize {
        if let Some(last) = self.last_flush {
            if now.saturating_duration_since(last) < self.config.notify_interval() {
                return 0;
            }
        }
        self.last_flush = Some(now);
        if self.state.events.is_empty() {
            return 0;
        }
        self.flush_events()
    }

    // ----- diagnostics -----

    /// Same vertices under the same parents with the same durable properties,
    /// deleted subtrees included.
    pub fn compare_structure<D: Clock>(&self, other: &ReplicatedTree<D>) -> bool {
        self.root_id == other.root_id
            && self.state.len() == other.state.len()
            && compare_vertices(&self.root_id, self, other)
            && compare_vertices(&VertexId::trash(), self, other)
    }

    /// Same move log, entry by entry.
    pub fn compare_move_ops<D: Clock>(&self, other: &ReplicatedTree<D>) -> bool {
        self.log.len() == other.log.len()
            && self
                .log
                .iter()
                .zip(other.log.iter())
                .all(|(a, b)| a.op.id == b.op.id)
    }

    /// Validate invariants: each child points back at its parent, no duplicate children,
    /// and no cycles. Intended for tests and debugging.
    pub fn validate_invariants(&self) -> Result<()> {
        for vertex in self.state.iter() {
            let mut seen = HashSet::new();
            for child in &vertex.children {
                if !seen.insert(child) {
                    return Err(Error::InconsistentState(format!(
                        "duplicate child {child} under {}",
                        vertex.id
                    )));
                }
                match self.state.get(child) {
                    Some(state) if state.parent.as_ref() == Some(&vertex.id) => {}
                    Some(_) => {
                        return Err(Error::InconsistentState(format!(
                            "child {child} does not point back at {}",
                            vertex.id
                        )))
                    }
                    None => {
                        return Err(Error::InconsistentState(format!(
                            "child {child} of {} not present",
                            vertex.id
                        )))
                    }
                }
            }
        }

        for vertex in self.state.iter() {
            let mut visited = HashSet::new();
            let mut current = Some(&vertex.id);
            while let Some(id) = current {
                if !visited.insert(id) {
                    return Err(Error::InconsistentState(format!("cycle through {id}")));
                }
                current = self.state.parent_of(id);
            }
        }
        Ok(())
    }

    fn fmt_vertex(
        &self,
        f: &mut fmt::Formatter<'_>,
        id: &VertexId,
        indent: &str,
        is_last: bool,
    ) -> fmt::Result {
        let branch = if is_last { "└── " } else { "├── " };
        writeln!(f, "{indent}{branch}{id}")?;
        let child_indent = format!("{indent}{}", if is_last { "    " } else { "│   " });
        for (key, value) in self.properties(id) {
            writeln!(f, "{child_indent}• {key}: {value}")?;
        }
        let children = self.child_ids(id);
        for (i, child) in children.iter().enumerate() {
            self.fmt_vertex(f, child, &child_indent, i + 1 == children.len())?;
        }
        Ok(())
    }
}

fn compare_vertices<A: Clock, B: Clock>(
    id: &VertexId,
    a: &ReplicatedTree<A>,
    b: &ReplicatedTree<B>,
) -> bool {
    let children_a = a.child_ids(id);
    let children_b = b.child_ids(id);
    if children_a.len() != children_b.len() {
        return false;
    }

    let props_a: HashMap<&str, &PropertyValue> = a
        .state
        .get(id)
        .map(|v| {
            v.durable_properties()
                .iter()
                .map(|(k, v)| (k.as_str(), v))
                .collect()
        })
        .unwrap_or_default();
    let props_b: HashMap<&str, &PropertyValue> = b
        .state
        .get(id)
        .map(|v| {
            v.durable_properties()
                .iter()
                .map(|(k, v)| (k.as_str(), v))
                .collect()
        })
        .unwrap_or_default();
    if props_a != props_b {
        return false;
    }

    children_a
        .iter()
        .all(|child| children_b.contains(child) && compare_vertices(child, a, b))
}

impl<C: Clock> fmt::Display for ReplicatedTree<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_vertex(f, &self.root_id, "", true)
    }
}
