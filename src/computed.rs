//! Lazily validated derived values (§4.3).
//!
//! Unlike the teacher's `create_memo` (eager: recomputes the instant a dependency changes),
//! `create_computed` only ever recomputes when *read* while `Check` or `Dirty` -- a write just
//! marks the observer graph (see [`crate::graph::mark_dependents`]); nothing here runs until the
//! next `get`/`with`. This is the deliberate rename+behavior-change the design notes call for.
//!
//! [`ensure_valid`] is also the engine [`crate::effect`] calls into to run an effect body: an
//! effect is a `Computation`-shaped node (it has `compute`, `sources`, `equals`) that additionally
//! gets queued into the scheduler instead of only being pulled by a reader.

use std::any::Any;

use crate::error::{catch_compute, ReactiveError};
use crate::graph::{self, with_root, Root};
use crate::node::{NodeId, NodeKind, NodeState, ReactiveNode};
use crate::signal::ReadSignal;

/// Creates a lazily validated computation with the default (`PartialEq`) equality check.
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_computed<T: PartialEq + 'static>(f: impl FnMut() -> T + 'static) -> ReadSignal<T> {
    create_computed_with_equals(f, |a, b| a == b)
}

/// Like [`create_computed`] but with an explicit equality predicate.
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_computed_with_equals<T: 'static>(
    mut f: impl FnMut() -> T + 'static,
    equals: impl Fn(&T, &T) -> bool + 'static,
) -> ReadSignal<T> {
    let id = with_root(|root| {
        let parent = root.current_node.get();
        let mut node = ReactiveNode::new(NodeKind::Computation, parent);
        node.scoped = true;
        // Not yet computed: the first read must run `f` regardless of having no prior sources.
        node.state = NodeState::Dirty;
        node.compute = Some(Box::new(move |slot: &mut Option<Box<dyn Any>>| {
            let new_value = f();
            let changed = match slot.as_deref() {
                Some(old) => {
                    let old = old.downcast_ref::<T>().expect("computed type mismatch");
                    !equals(old, &new_value)
                }
                None => true,
            };
            *slot = Some(Box::new(new_value));
            changed
        }));
        let id = root.nodes.borrow_mut().insert(node);
        if !parent.is_null() {
            if let Some(p) = root.nodes.borrow_mut().get_mut(parent) {
                p.children.push(id);
            }
        }
        id
    });
    ReadSignal::from_node(id)
}

/// Drives a node to `Clean`, recomputing if necessary. A no-op for any node that isn't a
/// `Computation`/`Effect` (signals have no `compute` and are always considered current) or that is
/// already `Clean`.
pub(crate) fn ensure_valid(root: &'static Root, id: NodeId) {
    let (kind, state) = {
        let nodes = root.nodes.borrow();
        match nodes.get(id) {
            Some(n) => (n.kind, n.state),
            None => return,
        }
    };
    if kind != NodeKind::Computation && kind != NodeKind::Effect {
        return;
    }
    match state {
        NodeState::Clean | NodeState::Disposed => {}
        NodeState::Dirty | NodeState::Inert => {
            recompute(root, id);
        }
        NodeState::Check => {
            let sources = {
                let nodes = root.nodes.borrow();
                nodes.get(id).map(|n| n.sources.clone()).unwrap_or_default()
            };
            let mut any_stale = false;
            for (src, captured_version) in sources {
                ensure_valid(root, src);
                let current_version = root
                    .nodes
                    .borrow()
                    .get(src)
                    .map(|n| n.version)
                    .unwrap_or(captured_version);
                if current_version != captured_version {
                    any_stale = true;
                    break;
                }
            }
            if any_stale {
                recompute(root, id);
            } else if let Some(n) = root.nodes.borrow_mut().get_mut(id) {
                if n.state == NodeState::Check {
                    n.state = NodeState::Clean;
                }
            }
        }
    }
}

/// Runs `id`'s `compute` closure, with cycle detection, scoped child disposal, source-list
/// reconciliation, and error routing. Always leaves the node `Clean` (or `Disposed`, if disposed
/// from within its own body) on return, even on error: an errored node keeps its previous value
/// and is not retried again until a fresh write marks it dirty.
#[cfg_attr(feature = "trace", tracing::instrument(skip(root)))]
pub(crate) fn recompute(root: &'static Root, id: NodeId) {
    if let Err(err) = graph::push_reader_checked(root, id) {
        if let Some(n) = root.nodes.borrow_mut().get_mut(id) {
            n.state = NodeState::Clean;
        }
        graph::handle_unhandled_error(id, err, false);
        return;
    }

    graph::reset_for_rerun(root, id);

    let had_value_before = {
        let nodes = root.nodes.borrow();
        nodes.get(id).map(|n| n.value.is_some()).unwrap_or(false)
    };

    let mut compute = {
        let mut nodes = root.nodes.borrow_mut();
        nodes.get_mut(id).and_then(|n| n.compute.take())
    };
    let mut value = {
        let mut nodes = root.nodes.borrow_mut();
        nodes.get_mut(id).and_then(|n| n.value.take())
    };

    let prev_node = root.current_node.replace(id);
    let (result, tracker): (Result<bool, ReactiveError>, _) = graph::tracked_scope(|| {
        catch_compute(|| {
            let compute = compute.as_mut().expect("computation node has no compute fn");
            compute(&mut value)
        })
    });
    root.current_node.set(prev_node);
    graph::pop_reader(root);

    match result {
        Ok(changed) => {
            graph::commit_sources(root, id, tracker.sources);
            let mut nodes = root.nodes.borrow_mut();
            if let Some(n) = nodes.get_mut(id) {
                n.compute = compute;
                n.value = value;
                if changed {
                    n.version = n.version.wrapping_add(1);
                }
                n.state = NodeState::Clean;
            }
        }
        Err(err) => {
            let mut nodes = root.nodes.borrow_mut();
            if let Some(n) = nodes.get_mut(id) {
                n.compute = compute;
                n.value = value;
                n.state = NodeState::Clean;
            }
            drop(nodes);
            let message = err.to_string();
            let err = if had_value_before {
                err
            } else {
                ReactiveError::FirstRunFailure { message }
            };
            graph::handle_unhandled_error(id, err, !had_value_before);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::create_root;
    use crate::signal::create_signal;

    #[test]
    fn computed_is_lazy_until_first_read() {
        create_root(|_| {
            let ran = create_signal(0i32);
            let source = create_signal(1i32);
            let doubled = create_computed(move || {
                ran.set(ran.get_untracked() + 1);
                source.get() * 2
            });
            // Not read yet: must not have run.
            assert_eq!(ran.get_untracked(), 0);
            assert_eq!(doubled.get(), 2);
            assert_eq!(ran.get_untracked(), 1);
        });
    }

    #[test]
    fn computed_only_recomputes_when_source_actually_changed() {
        create_root(|_| {
            let runs = create_signal(0i32);
            let source = create_signal(1i32);
            let doubled = create_computed(move || {
                runs.set(runs.get_untracked() + 1);
                source.get() * 2
            });
            assert_eq!(doubled.get(), 2);
            assert_eq!(runs.get_untracked(), 1);
            assert_eq!(doubled.get(), 2);
            assert_eq!(runs.get_untracked(), 1); // still clean, no re-run.
            source.set(5);
            assert_eq!(doubled.get(), 10);
            assert_eq!(runs.get_untracked(), 2);
        });
    }

    #[test]
    fn dependency_on_computed_propagates_through_check_state() {
        create_root(|_| {
            let a = create_signal(1i32);
            let b = create_computed(move || a.get() * 2);
            let c = create_computed(move || b.get() + 1);
            assert_eq!(c.get(), 3);
            a.set(10);
            assert_eq!(c.get(), 21);
        });
    }

    #[test]
    fn computed_recreates_dependencies_each_run() {
        create_root(|_| {
            let cond = create_signal(true);
            let a = create_signal(1i32);
            let b = create_signal(2i32);
            let result = create_computed(move || if cond.get() { a.get() } else { b.get() });
            assert_eq!(result.get(), 1);
            cond.set(false);
            assert_eq!(result.get(), 2);
            // `a` is no longer a source: changing it must not dirty `result`.
            a.set(100);
            // still Clean w.r.t. its now-current source set, so no recompute happens, and the
            // cached value (2) is returned without re-running the body.
            assert_eq!(result.get(), 2);
        });
    }

    #[test]
    fn error_in_computed_keeps_previous_value() {
        create_root(|_| {
            let should_panic = create_signal(false);
            let computed = create_computed(move || {
                if should_panic.get() {
                    panic!("boom");
                }
                42
            });
            assert_eq!(computed.get(), 42);
            should_panic.set(true);
            assert_eq!(computed.get(), 42); // error swallowed at the root, previous value kept.
        });
    }
}
