//! Reactive nodes: the common header shared by signals, computations, effects, and scopes.

use std::any::Any;
use std::cell::Cell;
#[cfg(debug_assertions)]
use std::panic::Location;

use slotmap::new_key_type;

use crate::error::ErrorHandler;

new_key_type! {
    /// A typed index into the graph's [`slotmap::SlotMap`].
    ///
    /// Stale ids (from a disposed node whose slot was reused) are caught by slotmap's generation
    /// check and fail soft: `nodes.get(id)` simply returns `None`.
    pub struct NodeId;
}

/// The propagation states a node's cached value can be in. See [`crate::graph`] for the
/// validator that drives these transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeState {
    /// Value is current with respect to all sources.
    Clean,
    /// At least one transitive source might have changed; needs validation before use.
    Check,
    /// At least one direct source has definitely changed; must recompute on next read.
    Dirty,
    /// Effect-only: scheduled but has not yet run for the first time.
    Inert,
    /// Terminal. The node has been torn down; all its edges are gone.
    Disposed,
}

/// What kind of node this is. Node storage is unified (one struct, one arena); dispatch is by
/// this tag rather than by a trait-object hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeKind {
    Signal,
    Computation,
    Effect,
    ScopeOnly,
}

/// A single node in the reactive graph: depending on `kind` this is a signal, a computation, an
/// effect, or a plain scope used only for ownership.
pub(crate) struct ReactiveNode {
    pub kind: NodeKind,
    /// Current cached value, if any. Plain scopes (`ScopeOnly`) leave this `None`.
    pub value: Option<Box<dyn Any>>,
    /// The function that recomputes `value` for computations and effects. Returns whether the
    /// new value differs from the old one (per `equals`).
    pub compute: Option<Box<dyn FnMut(&mut Option<Box<dyn Any>>) -> bool>>,
    /// Equality predicate used to short-circuit notification on unchanged values. Only
    /// meaningful for signals and computations.
    pub equals: Option<Box<dyn Fn(&dyn Any, &dyn Any) -> bool>>,

    /// Bumped every time `value` actually changes. Lets observers tell, without recomputing,
    /// whether a previously read source has moved on since it was captured.
    pub version: u64,

    /// Ownership tree: scopes/computations/effects created while this node was current.
    pub children: Vec<NodeId>,
    /// Owning parent, or the null key for a root.
    pub parent: NodeId,

    /// Signals/computations read during this node's last successful run, in read order, each
    /// paired with the source's `version` at the time it was captured. Position-stable: a re-run
    /// that reads the same sources in the same order only needs to compare versions.
    pub sources: Vec<(NodeId, u64)>,
    /// Computations/effects that read this node since its own last validation.
    pub observers: Vec<NodeId>,

    /// Cleanup callbacks, run in LIFO order on disposal or before a scoped re-run. Each is tagged
    /// with a monotonic id so `on_dispose`'s returned token can remove one without running it or
    /// touching the rest (see [`crate::scope::DisposeToken`]).
    pub cleanups: Vec<(u64, Box<dyn FnOnce()>)>,
    /// Error handlers registered on this scope via `on_error`, nearest-first.
    pub error_handlers: Vec<ErrorHandler>,
    /// Copy-on-write context map. `None` until the first `set_context` call in this scope.
    pub context: Option<std::rc::Rc<crate::context::ContextMap>>,

    pub state: NodeState,
    /// Whether, on recompute, this node first disposes its own children/cleanups/error handlers.
    /// True for effects and for computations created with `scoped: true`.
    pub scoped: bool,
    /// Set while an effect is sitting in the scheduler's pending queue, so two writes in the same
    /// cycle enqueueing it twice is a no-op (invariant I4).
    pub queued: Cell<bool>,

    #[cfg(debug_assertions)]
    pub created_at: &'static Location<'static>,
}

impl ReactiveNode {
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn new(kind: NodeKind, parent: NodeId) -> Self {
        Self {
            kind,
            value: None,
            compute: None,
            equals: None,
            version: 0,
            children: Vec::new(),
            parent,
            sources: Vec::new(),
            observers: Vec::new(),
            cleanups: Vec::new(),
            error_handlers: Vec::new(),
            context: None,
            state: NodeState::Clean,
            scoped: false,
            queued: Cell::new(false),
            #[cfg(debug_assertions)]
            created_at: Location::caller(),
        }
    }
}

/// A handle to a node, used to dispose it from outside the graph machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(pub(crate) NodeId);

impl NodeHandle {
    /// Disposes the node and every descendant it owns, in reverse creation order (I6).
    pub fn dispose(self) {
        crate::graph::dispose_node(self.0);
    }
}
