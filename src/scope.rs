//! The ownership/scope tree (§4.5): plain nodes that exist only to own children, independent of
//! any signal/computation/effect value.
//!
//! Grounded in the orphaned `root.rs`'s free-function API (`create_child_scope`,
//! `use_current_scope`, `use_global_scope`) but rebuilt on top of [`crate::graph`]'s lazy engine
//! rather than that file's eager DFS propagation.

use crate::graph::with_root;
use crate::node::{NodeHandle, NodeKind, NodeState, ReactiveNode};

/// Creates a child scope owned by whatever scope is currently running, runs `f` inside it, and
/// returns both `f`'s result and a handle that disposes the scope (and everything it owns --
/// signals, computations, effects, nested scopes, cleanups) in one call.
///
/// A scope has no value of its own; it exists purely so a subtree of reactive nodes can be torn
/// down as a unit without tearing down its parent.
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_child_scope<T>(f: impl FnOnce() -> T) -> (T, NodeHandle) {
    with_root(|root| {
        let parent = root.current_node.get();
        let id = root
            .nodes
            .borrow_mut()
            .insert(ReactiveNode::new(NodeKind::ScopeOnly, parent));
        if !parent.is_null() {
            if let Some(p) = root.nodes.borrow_mut().get_mut(parent) {
                p.children.push(id);
            }
        }
        let prev = root.current_node.replace(id);
        let ret = f();
        root.current_node.set(prev);
        (ret, NodeHandle(id))
    })
}

/// Returns a handle to the scope/computation/effect currently executing.
///
/// # Panics
/// Panics if called outside any [`crate::graph::create_root`].
pub fn use_current_scope() -> NodeHandle {
    let id = with_root(|root| root.current_node.get());
    assert!(!id.is_null(), "use_current_scope called outside any root");
    NodeHandle(id)
}

/// Returns a handle to the current root scope, regardless of how deeply nested the call site is.
///
/// # Panics
/// Panics if called outside any [`crate::graph::create_root`].
pub fn use_global_scope() -> NodeHandle {
    let id = with_root(|root| root.root_node.get());
    assert!(!id.is_null(), "use_global_scope called outside any root");
    NodeHandle(id)
}

/// Runs `f` as though `scope` were the currently running scope -- its context and error handlers
/// apply to anything `f` creates, and `use_current_scope`/`on_cleanup`/`on_error` called from
/// inside `f` attach to `scope` rather than wherever `scoped` was itself called from (spec.md §6
/// `scoped(fn, scope) -> R | undefined`). Returns `None` instead of running `f` at all if `scope`
/// has already been disposed.
///
/// Generalizes [`crate::graph::RootHandle::run_in`] (which only re-enters a *root* scope) to any
/// scope/computation/effect handle.
pub fn scoped<T>(scope: NodeHandle, f: impl FnOnce() -> T) -> Option<T> {
    with_root(|root| {
        let alive = root
            .nodes
            .borrow()
            .get(scope.0)
            .map(|n| n.state != NodeState::Disposed)
            .unwrap_or(false);
        if !alive {
            return None;
        }
        let prev = root.current_node.replace(scope.0);
        let ret = f();
        root.current_node.set(prev);
        Some(ret)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::create_root;
    use crate::signal::{create_signal, on_cleanup};

    #[test]
    fn child_scope_disposes_independently_of_parent() {
        create_root(|_| {
            let parent_signal = create_signal(0);
            let (child_signal, handle) = create_child_scope(|| create_signal(1));
            assert_eq!(child_signal.get(), 1);
            handle.dispose();
            assert!(!child_signal.is_alive());
            assert_eq!(parent_signal.get(), 0); // parent untouched.
        });
    }

    #[test]
    fn cleanup_runs_on_scope_dispose() {
        create_root(|_| {
            let ran = create_signal(false);
            let (_, handle) = create_child_scope(move || {
                on_cleanup(move || ran.set(true));
            });
            assert!(!ran.get());
            handle.dispose();
            assert!(ran.get());
        });
    }

    #[test]
    fn cleanups_run_in_lifo_order() {
        create_root(|_| {
            let order = create_signal(Vec::<i32>::new());
            let (_, handle) = create_child_scope(move || {
                on_cleanup(move || order.update(|v| v.push(1)));
                on_cleanup(move || order.update(|v| v.push(2)));
                on_cleanup(move || order.update(|v| v.push(3)));
            });
            handle.dispose();
            assert_eq!(order.get(), vec![3, 2, 1]);
        });
    }

    #[test]
    fn use_current_scope_returns_the_running_scope() {
        create_root(|_| {
            let outer = use_current_scope();
            let (inner, _handle) = create_child_scope(use_current_scope);
            assert_ne!(outer, inner);
        });
    }

    #[test]
    fn scoped_runs_f_with_the_given_scope_current() {
        create_root(|_| {
            crate::context::set_context("answer", 1i32);
            let (_, child) = create_child_scope(|| {
                crate::context::set_context("answer", 2i32);
            });
            let seen = scoped(child, || crate::context::get_context::<i32>("answer").map(|v| *v));
            assert_eq!(seen, Some(Some(2)));
        });
    }

    #[test]
    fn scoped_on_a_disposed_scope_returns_none_without_running_f() {
        create_root(|_| {
            let ran = create_signal(false);
            let (_, child) = create_child_scope(|| {});
            child.dispose();
            let result = scoped(child, move || ran.set(true));
            assert!(result.is_none());
            assert!(!ran.get());
        });
    }
}
