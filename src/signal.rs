//! Reactive signals: the source nodes of the graph (§4.2).
//!
//! Grounded in the teacher's `signals.rs`/`root.rs` pair (`create_signal`, `ReadSignal::get`,
//! `Signal::set`), adapted to the [`crate::graph`] engine: a signal is a plain [`NodeKind::Signal`]
//! node carrying a `value` and an `equals` predicate. Reading one calls [`graph::track`]; writing
//! one calls [`graph::notify`], which does the dirty-marking sweep but never recomputes anything
//! directly (that happens lazily, pulled by the next `read` of a dependent computation).

use std::fmt;
use std::marker::PhantomData;
#[cfg(debug_assertions)]
use std::panic::Location;

use crate::error::ErrorHandler;
use crate::graph::{self, with_root};
use crate::node::{NodeHandle, NodeId, NodeKind, NodeState, ReactiveNode};

/// A read-only handle to a signal's value. Obtained from [`Signal::read_only`]/[`readonly`], or
/// as the return type of [`crate::computed::create_computed`].
pub struct ReadSignal<T> {
    pub(crate) id: NodeId,
    #[cfg(debug_assertions)]
    created_at: &'static Location<'static>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ReadSignal<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for ReadSignal<T> {}

impl<T> fmt::Debug for ReadSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadSignal").field("id", &self.id).finish()
    }
}

impl<T> ReadSignal<T> {
    /// Wraps an existing node id as a typed read handle. Used by [`crate::computed`] (and
    /// anything else that builds nodes directly) since `created_at`/`_marker` aren't constructible
    /// outside this module.
    #[cfg_attr(debug_assertions, track_caller)]
    pub(crate) fn from_node(id: NodeId) -> Self {
        ReadSignal {
            id,
            #[cfg(debug_assertions)]
            created_at: Location::caller(),
            _marker: PhantomData,
        }
    }
}

/// A read-write handle to a signal. `Copy`, like every node handle in this crate: the data lives
/// in the graph's arena, this is just an index into it plus a phantom type tag.
pub struct Signal<T> {
    inner: ReadSignal<T>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Signal<T> {}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal").field("id", &self.inner.id).finish()
    }
}

#[cfg(debug_assertions)]
fn panic_disposed(id: NodeId, created_at: &'static Location<'static>) -> ! {
    panic!("signal created at {created_at} has been disposed (id {id:?})");
}
#[cfg(not(debug_assertions))]
fn panic_disposed(_id: NodeId) -> ! {
    panic!("signal has been disposed");
}

/// Creates a new signal with the given initial value and the default (`PartialEq`) equality
/// check. Writes that compare equal to the current value are no-ops (§4.2).
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_signal<T: PartialEq + 'static>(value: T) -> Signal<T> {
    create_signal_with_equals(value, |a, b| a == b)
}

/// Like [`create_signal`] but with an explicit equality predicate instead of `PartialEq`. Useful
/// for types that don't implement it, or where identity is the right notion of "unchanged".
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_signal_with_equals<T: 'static>(
    value: T,
    equals: impl Fn(&T, &T) -> bool + 'static,
) -> Signal<T> {
    let id = with_root(|root| {
        let parent = root.current_node.get();
        let mut node = ReactiveNode::new(NodeKind::Signal, parent);
        node.value = Some(Box::new(value));
        node.equals = Some(Box::new(move |a, b| {
            equals(
                a.downcast_ref::<T>().expect("signal type mismatch"),
                b.downcast_ref::<T>().expect("signal type mismatch"),
            )
        }));
        let id = root.nodes.borrow_mut().insert(node);
        if !parent.is_null() {
            if let Some(p) = root.nodes.borrow_mut().get_mut(parent) {
                p.children.push(id);
            }
        }
        id
    });
    Signal {
        inner: ReadSignal {
            id,
            #[cfg(debug_assertions)]
            created_at: Location::caller(),
            _marker: PhantomData,
        },
    }
}

impl<T: 'static> ReadSignal<T> {
    /// Reads the value, establishing a dependency edge if called from inside a tracked read
    /// (a running computation or effect).
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn get(self) -> T
    where
        T: Clone,
    {
        self.with(Clone::clone)
    }

    /// Reads the value without establishing a dependency edge. Equivalent to
    /// `peek(|| self.get())` but cheaper (no reader-slot save/restore).
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn get_untracked(self) -> T
    where
        T: Clone,
    {
        self.with_untracked(Clone::clone)
    }

    /// Runs `f` on a reference to the current value, tracking the read.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn with<U>(self, f: impl FnOnce(&T) -> U) -> U {
        self.track();
        self.with_untracked(f)
    }

    /// Runs `f` on a reference to the current value without tracking.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn with_untracked<U>(self, f: impl FnOnce(&T) -> U) -> U {
        with_root(|root| {
            // No-op for plain signals; drives a computation/effect node to `Clean` first,
            // recomputing if it is `Dirty`/`Check` (§4.3). This is the "read pulls validation"
            // half of laziness -- a computed that is never read never runs its body.
            crate::computed::ensure_valid(root, self.id);
            let nodes = root.nodes.borrow();
            let Some(node) = nodes.get(self.id) else {
                #[cfg(debug_assertions)]
                panic_disposed(self.id, self.created_at);
                #[cfg(not(debug_assertions))]
                panic_disposed(self.id);
            };
            let value = node
                .value
                .as_ref()
                .expect("signal node has no value")
                .downcast_ref::<T>()
                .expect("signal type mismatch");
            f(value)
        })
    }

    /// Establishes a dependency edge on this signal from the currently running reader, without
    /// reading the value. Used by [`crate::selector`] and by explicit-dependency helpers.
    pub fn track(self) {
        graph::track(self.id);
    }

    /// Returns `true` if the signal has not yet been disposed. A disposed signal's node stays
    /// addressable (see [`crate::graph::dispose_node`]) so that reads keep returning its last
    /// value; this is the way to tell the two states apart.
    pub fn is_alive(self) -> bool {
        with_root(|root| {
            root.nodes
                .borrow()
                .get(self.id)
                .map(|n| n.state != NodeState::Disposed)
                .unwrap_or(false)
        })
    }

    /// A handle that can be used to dispose just this signal (outside of disposing its owning
    /// scope).
    pub fn node_handle(self) -> NodeHandle {
        NodeHandle(self.id)
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// See [`ReadSignal::get`].
    pub fn get(self) -> T {
        self.inner.get()
    }

    /// See [`ReadSignal::get_untracked`].
    pub fn get_untracked(self) -> T {
        self.inner.get_untracked()
    }
}

impl<T: 'static> Signal<T> {
    /// See [`ReadSignal::with`].
    pub fn with<U>(self, f: impl FnOnce(&T) -> U) -> U {
        self.inner.with(f)
    }

    /// See [`ReadSignal::with_untracked`].
    pub fn with_untracked<U>(self, f: impl FnOnce(&T) -> U) -> U {
        self.inner.with_untracked(f)
    }

    /// See [`ReadSignal::track`].
    pub fn track(self) {
        self.inner.track();
    }

    /// Strips write access, exposing only the read half (spec.md §6 `readonly`). Mirrors the
    /// teacher's `*signal` deref-to-`ReadSignal` as an explicit method instead.
    pub fn read_only(self) -> ReadSignal<T> {
        self.inner
    }

    /// Sets the value. A no-op -- no write, no version bump, no notification -- if it compares
    /// equal to the current value under this signal's `equals` predicate (§4.2).
    ///
    /// spec.md's design notes resolve the "function-valued signal" ambiguity by treating a value
    /// passed to `set` as always a plain value, never an implicit updater: a signal whose value is
    /// itself a function is updated through [`Signal::update`] instead (§9 design note #2).
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn set(self, value: T) {
        with_root(|root| {
            let changed = {
                let mut nodes = root.nodes.borrow_mut();
                let Some(node) = nodes.get_mut(self.inner.id) else {
                    // Writing to a disposed signal is a silent no-op (spec.md §7).
                    return;
                };
                let current = node
                    .value
                    .as_ref()
                    .expect("signal node has no value")
                    .downcast_ref::<T>()
                    .expect("signal type mismatch");
                let changed = match &node.equals {
                    Some(eq) => !eq(current, &value),
                    None => true,
                };
                if changed {
                    node.value = Some(Box::new(value));
                    node.version = node.version.wrapping_add(1);
                }
                changed
            };
            if changed {
                graph::notify(root, self.inner.id);
            }
        });
    }

    /// Updates the value in place via `f`, which receives `&mut T`. This is the "functional
    /// update" form of `set` from spec.md §6, expressed as its own method rather than an
    /// overloaded `set` so that a signal whose `T` is itself a function type is never ambiguous
    /// about which case applies (§9 design note #2). Always notifies on success: because `f`
    /// mutates in place, there is no pre-mutation value to hand to `equals` without requiring
    /// `T: Clone`, so unlike `set` this does not short-circuit on an unchanged result.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn update(self, f: impl FnOnce(&mut T)) {
        with_root(|root| {
            let ok = {
                let mut nodes = root.nodes.borrow_mut();
                let Some(node) = nodes.get_mut(self.inner.id) else {
                    return;
                };
                let mut value = node.value.take().expect("signal node has no value");
                f(value.downcast_mut::<T>().expect("signal type mismatch"));
                node.value = Some(value);
                node.version = node.version.wrapping_add(1);
                true
            };
            if ok {
                graph::notify(root, self.inner.id);
            }
        });
    }

}

/// Strips write access from a [`Signal`], exposing only its read half (spec.md §6).
pub fn readonly<T: 'static>(signal: Signal<T>) -> ReadSignal<T> {
    signal.read_only()
}

/// Object-safe facade over "any trackable signal, regardless of its value type", so a fixed-size
/// array of dependencies can mix a `ReadSignal<i32>` with a `Signal<String>` and so on. Implemented
/// by both [`ReadSignal`] and [`Signal`]; used by [`crate::on`].
pub trait AnyReadSignal {
    /// See [`ReadSignal::track`].
    fn track(&self);
}

impl<T: 'static> AnyReadSignal for ReadSignal<T> {
    fn track(&self) {
        ReadSignal::track(*self);
    }
}

impl<T: 'static> AnyReadSignal for Signal<T> {
    fn track(&self) {
        Signal::track(*self);
    }
}

/// Runtime predicate: `true` for any [`ReadSignal<T>`] (and therefore any [`Signal<T>`]) --
/// spec.md §6.
pub fn is_read_signal<T>(_signal: ReadSignal<T>) -> bool {
    true
}

/// Runtime predicate: `true` for any [`Signal<T>`] -- spec.md §6.
pub fn is_write_signal<T>(_signal: Signal<T>) -> bool {
    true
}

/// Registers `f` to run when the current scope is disposed. Cleanups within one scope run in LIFO
/// order (§4.5). Returns a token that removes this specific cleanup without running it and
/// without disposing the scope.
pub fn on_cleanup(f: impl FnOnce() + 'static) -> DisposeToken {
    with_root(|root| {
        let node = root.current_node.get();
        let id = graph::push_cleanup(root, node, Box::new(f));
        DisposeToken { node, id }
    })
}

/// A token returned by [`on_dispose`] that can remove its cleanup before the scope disposes.
#[derive(Clone, Copy)]
pub struct DisposeToken {
    node: NodeId,
    id: u64,
}

impl DisposeToken {
    /// Removes the cleanup this token refers to without running it. A no-op if the owning scope
    /// has already disposed (and so already ran or dropped it).
    pub fn remove(self) {
        with_root(|root| graph::remove_cleanup(root, self.node, self.id));
    }
}

/// Registers an error handler on the current scope (§4.5). Handlers are tried nearest-scope-first;
/// returning `true` from `handler` absorbs the error, `false` lets it keep propagating to the
/// parent scope.
pub fn on_error(handler: impl Fn(&crate::error::ReactiveError) -> bool + 'static) {
    with_root(|root| {
        let node = root.current_node.get();
        if let Some(n) = root.nodes.borrow_mut().get_mut(node) {
            n.error_handlers.push(ErrorHandler(std::rc::Rc::new(handler)));
        }
    });
}

impl<T: fmt::Display + 'static> fmt::Display for ReadSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with(|value| value.fmt(f))
    }
}
impl<T: fmt::Display + 'static> fmt::Display for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with(|value| value.fmt(f))
    }
}

#[cfg(feature = "serde")]
impl<T: serde::Serialize + 'static> serde::Serialize for ReadSignal<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.with(|value| value.serialize(serializer))
    }
}
#[cfg(feature = "serde")]
impl<'de, T: serde::Deserialize<'de> + PartialEq + 'static> serde::Deserialize<'de> for ReadSignal<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(create_signal(T::deserialize(deserializer)?).read_only())
    }
}
#[cfg(feature = "serde")]
impl<T: serde::Serialize + 'static> serde::Serialize for Signal<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.with(|value| value.serialize(serializer))
    }
}
#[cfg(feature = "serde")]
impl<'de, T: serde::Deserialize<'de> + PartialEq + 'static> serde::Deserialize<'de> for Signal<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(create_signal(T::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computed::create_computed;
    use crate::graph::create_root;

    #[test]
    fn signal_read_write() {
        create_root(|_| {
            let state = create_signal(0);
            assert_eq!(state.get(), 0);
            state.set(1);
            assert_eq!(state.get(), 1);
        });
    }

    #[test]
    fn equal_value_write_is_a_no_op() {
        let ((), _root) = create_root(|_| {
            let state = create_signal(1);
            let calls = create_signal(0i32);
            let double = create_computed(move || {
                calls.set(calls.get_untracked() + 1);
                state.get() * 2
            });
            assert_eq!(double.get(), 2);
            assert_eq!(calls.get_untracked(), 1);
            state.set(1); // equal to current value: no notification at all.
            assert_eq!(calls.get_untracked(), 1);
            assert_eq!(double.get(), 2);
            assert_eq!(calls.get_untracked(), 1);
        });
    }

    #[test]
    fn reading_disposed_signal_returns_last_value_silently() {
        let (signal, root) = create_root(|_| create_signal(42));
        root.dispose();
        assert!(!signal.is_alive());
        assert_eq!(signal.get(), 42); // spec.md §7 "disposed-access": last value, no panic.
    }

    #[test]
    fn writing_disposed_signal_is_a_silent_no_op() {
        let (signal, root) = create_root(|_| create_signal(0));
        root.dispose();
        signal.set(42); // must not panic.
    }
}
