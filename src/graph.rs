//! The reactive [`Root`]: node storage, the current reader/scope slot, dependency tracking,
//! write-time dirty propagation, and disposal. This is the load-bearing module every other part
//! of the crate builds on.
//!
//! Architecturally this is a direct descendant of the teacher's `NodeId`/`SlotMap`/thread-local
//! `Root` design (see `root.rs`/`node.rs` in the reference pack): one arena, one thread-local
//! current root, position-stable source lists. The one deliberate departure is propagation:
//! the teacher's `propagate_node_updates` eagerly re-runs every `Dirty` node found by a DFS,
//! which makes "lazy" (an unread computation never runs its `compute`) false. Here, writes only
//! ever *mark* `Dirty`/`Check` outward (`mark_dependents`); the actual recompute happens lazily,
//! pulled by the next `read` (see [`crate::computed`]).

use std::cell::{Cell, RefCell};

use slotmap::{Key, SlotMap};
use smallvec::SmallVec;

use crate::error::{dispatch_error, ReactiveError};
use crate::node::{NodeId, NodeKind, NodeState, ReactiveNode};

thread_local! {
    static GLOBAL_ROOT: Cell<Option<&'static Root>> = const { Cell::new(None) };
}

/// Tracks the signals/computations read during a single `tracked_scope` call.
#[derive(Default)]
pub(crate) struct DependencyTracker {
    pub sources: SmallVec<[(NodeId, u64); 4]>,
}

/// The whole reactive graph for one thread. Ordinarily there is exactly one, created by
/// [`create_root`] and leaked for the lifetime of the program (the same trade-off the teacher
/// makes: the alternative is a lifetime-carrying arena, which this crate deliberately avoids per
/// the "typed indices into arenas rather than shared pointers" design note).
pub(crate) struct Root {
    pub nodes: RefCell<SlotMap<NodeId, ReactiveNode>>,
    /// The scope/computation/effect currently executing. The null key at the top level.
    pub current_node: Cell<NodeId>,
    pub root_node: Cell<NodeId>,
    /// `Some` while a `tracked_scope` is collecting reads; swapped out and restored around every
    /// `compute`/`read` boundary.
    pub tracker: RefCell<Option<DependencyTracker>>,
    /// Reader stack used for cycle detection. Only consulted in debug builds.
    pub reader_stack: RefCell<Vec<NodeId>>,
    pub batching: Cell<bool>,
    /// Signals written while `batching` was true; their observer-marking is deferred to the end
    /// of the batch so intermediate writes don't cause intermediate notifications.
    pub batch_queue: RefCell<Vec<NodeId>>,
    pub scheduler: crate::effect::Scheduler,
}

impl Root {
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn global() -> &'static Root {
        GLOBAL_ROOT.with(|cell| cell.get()).expect(
            "no reactive root found: this call must happen inside create_root's closure (or \
             after create_root has set its root as current)",
        )
    }

    pub fn set_global(root: Option<&'static Root>) -> Option<&'static Root> {
        GLOBAL_ROOT.with(|cell| cell.replace(root))
    }

    fn new_static() -> &'static Self {
        let this = Box::leak(Box::new(Root {
            nodes: RefCell::new(SlotMap::default()),
            current_node: Cell::new(NodeId::null()),
            root_node: Cell::new(NodeId::null()),
            tracker: RefCell::new(None),
            reader_stack: RefCell::new(Vec::new()),
            batching: Cell::new(false),
            batch_queue: RefCell::new(Vec::new()),
            scheduler: crate::effect::Scheduler::new(),
        }));
        let prev = Root::set_global(Some(this));
        let root_node = this
            .nodes
            .borrow_mut()
            .insert(ReactiveNode::new(NodeKind::ScopeOnly, NodeId::null()));
        this.root_node.set(root_node);
        this.current_node.set(root_node);
        Root::set_global(prev);
        this
    }
}

/// Runs `f` with the current root, for modules that don't want to spell out
/// `Root::global()` at every call site.
pub(crate) fn with_root<T>(f: impl FnOnce(&'static Root) -> T) -> T {
    f(Root::global())
}

/// The id of the scope/computation/effect currently executing, or the null id at the top level
/// outside any scope.
pub(crate) fn current_scope_id() -> NodeId {
    with_root(|root| root.current_node.get())
}

/// A handle passed into [`create_root`]'s closure that disposes the whole root when invoked.
///
/// Stable Rust cannot make a plain struct callable with `()`, so unlike the spec's illustrative
/// `init receives a dispose function`, this is invoked via [`Dispose::call`].
#[derive(Clone, Copy)]
pub struct Dispose(&'static Root);

impl Dispose {
    pub fn call(&self) {
        dispose_node(self.0.root_node.get());
    }
}

/// A handle to a detached root, returned by [`create_root`]. Disposing it tears down every
/// signal, computation, effect, and scope created inside.
#[derive(Clone, Copy)]
pub struct RootHandle {
    root: &'static Root,
}

impl RootHandle {
    pub fn dispose(&self) {
        dispose_node(self.root.root_node.get());
    }

    /// Runs `f` with this root made current. Useful for interacting with a root from outside the
    /// closure originally passed to [`create_root`].
    pub fn run_in<T>(&self, f: impl FnOnce() -> T) -> T {
        let prev = Root::set_global(Some(self.root));
        let ret = f();
        Root::set_global(prev);
        ret
    }
}

/// Creates a new, detached reactive root and runs `f` inside it. `f` receives a [`Dispose`]
/// handle it can call to tear the root down from within; the same can be done afterwards via the
/// returned [`RootHandle`].
#[must_use = "a root should eventually be disposed, either via the Dispose handle or RootHandle"]
pub fn create_root<T>(f: impl FnOnce(Dispose) -> T) -> (T, RootHandle) {
    let root = Root::new_static();
    let prev = Root::set_global(Some(root));
    let ret = f(Dispose(root));
    Root::set_global(prev);
    (ret, RootHandle { root })
}

/// Records a read of `source` (with its current version) against the tracker of whatever scope
/// is currently running a tracked computation, establishing the observer edge (s ∈ c.sources ⇔ c
/// ∈ s.observers, invariant I1) once the run commits. A no-op if nothing is currently tracking
/// (e.g. inside `untrack`/`peek`, or at the top level).
pub(crate) fn track(source: NodeId) {
    with_root(|root| {
        let mut tracker = root.tracker.borrow_mut();
        if let Some(tracker) = tracker.as_mut() {
            let nodes = root.nodes.borrow();
            let Some(node) = nodes.get(source) else {
                return;
            };
            // A disposed source cannot gain new observers (I2): reading it is silently untracked,
            // matching the "disposed-access" rule in spec.md §7 rather than resurrecting an edge.
            if node.state == NodeState::Disposed {
                return;
            }
            let version = node.version;
            if !tracker.sources.iter().any(|&(id, _)| id == source) {
                tracker.sources.push((source, version));
            }
        }
    });
}

/// Swaps in a fresh [`DependencyTracker`], runs `f`, and returns both `f`'s result and whatever
/// was tracked, restoring the previous tracker (which may be `None`, or an outer computation's
/// tracker if this run is nested inside another's).
pub(crate) fn tracked_scope<T>(f: impl FnOnce() -> T) -> (T, DependencyTracker) {
    with_root(|root| {
        let prev = root.tracker.replace(Some(DependencyTracker::default()));
        let ret = f();
        let tracker = root.tracker.replace(prev).unwrap();
        (ret, tracker)
    })
}

/// Commits a freshly discovered source list onto `dependent`, using the position-stable prefix
/// rule from the design notes: sources unchanged in both identity and position are left alone;
/// only the diverging tail is unlinked/relinked.
pub(crate) fn commit_sources(root: &Root, dependent: NodeId, new_sources: SmallVec<[(NodeId, u64); 4]>) {
    let mut nodes = root.nodes.borrow_mut();
    let old_sources = std::mem::take(&mut nodes[dependent].sources);

    let prefix_len = old_sources
        .iter()
        .zip(new_sources.iter())
        .take_while(|((a, _), (b, _))| a == b)
        .count();

    for (old_src, _) in &old_sources[prefix_len..] {
        if let Some(src_node) = nodes.get_mut(*old_src) {
            src_node.observers.retain(|&id| id != dependent);
        }
    }
    for (new_src, _) in &new_sources[prefix_len..] {
        if let Some(src_node) = nodes.get_mut(*new_src) {
            if !src_node.observers.contains(&dependent) {
                src_node.observers.push(dependent);
            }
        }
    }
    nodes[dependent].sources = new_sources.into_vec();
}

/// Write-time propagation (§4.2 "notify-observers"): a breadth-first downward sweep that marks
/// direct observers `Dirty` and everything beyond `Check`, stopping as soon as it reaches a node
/// that is already at least as dirty (its subtree is already marked). Every effect newly marked
/// here -- whether it is a direct observer of the write (`Dirty`) or only reachable through an
/// intervening computed (`Check`) -- is enqueued into the scheduler; nothing is recomputed here,
/// and a `Check` effect's own flush-time run revalidates its sources before deciding whether to
/// actually re-run its body (see [`crate::effect::run_effect`]).
pub(crate) fn mark_dependents(root: &'static Root, start: NodeId) {
    let mut frontier: Vec<NodeId> = {
        let nodes = root.nodes.borrow();
        nodes
            .get(start)
            .map(|n| n.observers.clone())
            .unwrap_or_default()
    };
    let mut first_hop = true;
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for id in frontier {
            let mut nodes = root.nodes.borrow_mut();
            let Some(node) = nodes.get_mut(id) else {
                continue;
            };
            if node.state == NodeState::Disposed {
                continue;
            }
            let already_at_least_this_dirty = if first_hop {
                node.state == NodeState::Dirty
            } else {
                node.state == NodeState::Dirty || node.state == NodeState::Check
            };
            if already_at_least_this_dirty {
                continue;
            }
            node.state = if first_hop {
                NodeState::Dirty
            } else {
                NodeState::Check
            };
            let is_effect = node.kind == NodeKind::Effect;
            let children = node.observers.clone();
            drop(nodes);
            if is_effect {
                crate::effect::enqueue(root, id);
            }
            next.extend(children);
        }
        frontier = next;
        first_hop = false;
    }
}

/// Notifies observers of `id` now, or defers to the end of the batch if one is in progress. A
/// non-batched write settles its effects immediately afterwards (`flush_sync`'s re-entrancy guard
/// makes this safe even when the write happens from inside an effect or computation that is
/// itself mid-flush): this is the "microtask" boundary collapsing onto "after the triggering
/// `set` returns" in the absence of a real async executor tick (see `executor.rs`).
pub(crate) fn notify(root: &'static Root, id: NodeId) {
    if root.batching.get() {
        root.batch_queue.borrow_mut().push(id);
    } else {
        mark_dependents(root, id);
        crate::executor::schedule_flush();
    }
}

/// Batches writes: intermediate `mark_dependents` sweeps (and the effect flush they'd trigger)
/// are deferred until `f` returns, so effects see only the final value of anything written
/// multiple times inside `f`.
pub fn batch<T>(f: impl FnOnce() -> T) -> T {
    with_root(|root| {
        root.batching.set(true);
        let ret = f();
        root.batching.set(false);
        let queued = root.batch_queue.take();
        for id in queued {
            mark_dependents(root, id);
        }
        crate::executor::schedule_flush();
        ret
    })
}

/// Runs `f` with tracking suppressed (the reader slot cleared) but the current scope preserved,
/// so `onDispose`/`onError` registered inside `f` still attach to the surrounding scope.
pub fn peek<T>(f: impl FnOnce() -> T) -> T {
    with_root(|root| {
        let prev = root.tracker.replace(None);
        let ret = f();
        root.tracker.replace(prev);
        ret
    })
}

/// Runs `f` with both tracking and the current scope suppressed.
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    with_root(|root| {
        let prev_tracker = root.tracker.replace(None);
        let prev_scope = root.current_node.replace(NodeId::null());
        let ret = f();
        root.current_node.set(prev_scope);
        root.tracker.replace(prev_tracker);
        ret
    })
}

/// Pushes `id` onto the reader stack for cycle detection (debug builds only), returning an error
/// instead of panicking immediately so the caller can route it through the normal error-handler
/// chain like any other compute failure.
#[cfg(debug_assertions)]
pub(crate) fn push_reader_checked(root: &Root, id: NodeId) -> Result<(), ReactiveError> {
    let mut stack = root.reader_stack.borrow_mut();
    if stack.contains(&id) {
        let chain = stack
            .iter()
            .map(|id| format!("{id:?}"))
            .collect::<Vec<_>>()
            .join(" -> ");
        return Err(ReactiveError::Cycle {
            chain: format!("{chain} -> {id:?}"),
        });
    }
    stack.push(id);
    Ok(())
}

#[cfg(debug_assertions)]
pub(crate) fn pop_reader(root: &Root) {
    root.reader_stack.borrow_mut().pop();
}

#[cfg(not(debug_assertions))]
pub(crate) fn push_reader_checked(_root: &Root, _id: NodeId) -> Result<(), ReactiveError> {
    Ok(())
}

#[cfg(not(debug_assertions))]
pub(crate) fn pop_reader(_root: &Root) {}

/// Full disposal (§4.5): this node's own cleanups run (LIFO), then its children are disposed
/// recursively in reverse creation order, then its outgoing source edges are unlinked, then it is
/// unlinked from its parent and transitioned to `Disposed`. Idempotent and re-entrant-safe:
/// marking `Disposed` up front is the guard against a cleanup that (directly or transitively)
/// disposes the same node again.
#[cfg_attr(feature = "trace", tracing::instrument)]
pub(crate) fn dispose_node(id: NodeId) {
    with_root(|root| dispose_node_in(root, id));
}

fn dispose_node_in(root: &'static Root, id: NodeId) {
    {
        let mut nodes = root.nodes.borrow_mut();
        let Some(node) = nodes.get_mut(id) else {
            return;
        };
        if node.state == NodeState::Disposed {
            return;
        }
        node.state = NodeState::Disposed;
    }

    run_cleanups(root, id);

    let children = {
        let mut nodes = root.nodes.borrow_mut();
        nodes.get_mut(id).map(|n| std::mem::take(&mut n.children))
    }
    .unwrap_or_default();
    for child in children.into_iter().rev() {
        dispose_node_in(root, child);
    }

    let (sources, parent) = {
        let mut nodes = root.nodes.borrow_mut();
        match nodes.get_mut(id) {
            Some(node) => (std::mem::take(&mut node.sources), node.parent),
            None => (Vec::new(), NodeId::null()),
        }
    };
    let mut nodes = root.nodes.borrow_mut();
    for (src, _) in sources {
        if let Some(src_node) = nodes.get_mut(src) {
            src_node.observers.retain(|&o| o != id);
        }
    }
    if let Some(parent_node) = nodes.get_mut(parent) {
        parent_node.children.retain(|&c| c != id);
    }
    // The slot itself is deliberately NOT removed from the arena: spec.md §7's "disposed-access"
    // rule requires that reading a disposed signal keep returning its last value silently rather
    // than panicking, which needs the node (and its `value`) to remain addressable by `NodeId`
    // after disposal. `compute`/`error_handlers`/`context` are dropped here since nothing can
    // observe them again; `observers` and `sources` are already empty (I2).
    if let Some(node) = nodes.get_mut(id) {
        node.compute = None;
        node.error_handlers.clear();
        node.context = None;
    }
}

/// Runs (and clears) a node's own cleanups, LIFO, with tracking suppressed, without touching its
/// children. Used both by full disposal and by a scoped node's pre-recompute reset.
pub(crate) fn run_cleanups(root: &'static Root, id: NodeId) {
    let cleanups = {
        let mut nodes = root.nodes.borrow_mut();
        nodes
            .get_mut(id)
            .map(|n| std::mem::take(&mut n.cleanups))
            .unwrap_or_default()
    };
    for (_, cb) in cleanups.into_iter().rev() {
        untrack(cb);
    }
}

/// Appends a cleanup to `node`'s list and returns the id it was tagged with, so the caller (see
/// [`crate::scope::on_dispose`]) can hand back a token that removes it without running it.
pub(crate) fn push_cleanup(root: &Root, node: NodeId, cb: Box<dyn FnOnce()>) -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT_CLEANUP_ID: AtomicU64 = AtomicU64::new(0);
    let id = NEXT_CLEANUP_ID.fetch_add(1, Ordering::Relaxed);
    if let Some(n) = root.nodes.borrow_mut().get_mut(node) {
        n.cleanups.push((id, cb));
    }
    id
}

/// Removes a previously registered cleanup by id without running it. A no-op if the node is gone
/// or the cleanup already ran.
pub(crate) fn remove_cleanup(root: &Root, node: NodeId, id: u64) {
    if let Some(n) = root.nodes.borrow_mut().get_mut(node) {
        n.cleanups.retain(|&(cid, _)| cid != id);
    }
}

/// Disposes `id`'s children (recursively, in reverse creation order), then runs `id`'s own
/// pending cleanups, then clears its error handlers — the "scoped re-run reset" from §4.3's
/// Recompute step, distinct from (and in a different order than) full disposal above.
pub(crate) fn reset_for_rerun(root: &'static Root, id: NodeId) {
    let children = {
        let mut nodes = root.nodes.borrow_mut();
        nodes.get_mut(id).map(|n| std::mem::take(&mut n.children))
    }
    .unwrap_or_default();
    for child in children.into_iter().rev() {
        dispose_node_in(root, child);
    }
    run_cleanups(root, id);
    if let Some(node) = root.nodes.borrow_mut().get_mut(id) {
        node.error_handlers.clear();
    }
}

/// Handles a compute/effect error that was not absorbed by any scope handler, dispatching it to
/// the owner chain and, for a computation's unrecoverable first run, resuming the panic.
pub(crate) fn handle_unhandled_error(owner: NodeId, err: ReactiveError, fatal_if_unhandled: bool) {
    let absorbed = dispatch_error(owner, &err);
    if !absorbed && fatal_if_unhandled {
        std::panic::resume_unwind(Box::new(err.to_string()));
    }
}
