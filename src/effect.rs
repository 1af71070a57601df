//! The effect scheduler (§4.4): a FIFO queue of dirty effects, flushed synchronously whenever a
//! top-level write settles (the microtask boundary collapses to "after the triggering `set`/
//! `batch` returns" in this single-threaded default -- see `executor.rs` for how a host can swap
//! in a real async tick instead).
//!
//! Grounded in the teacher's `effects.rs` (`create_effect` = eager `create_memo`), but genuinely
//! decoupled from computations: an effect is pushed into a pending queue by
//! [`crate::graph::mark_dependents`] and drained by [`flush_sync`], rather than recomputed inline
//! the moment something reads it like a [`crate::computed`] node.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use crate::computed::{ensure_valid, recompute};
use crate::graph::{with_root, Root};
use crate::node::{NodeId, NodeKind, NodeState, ReactiveNode};

/// Holds the pending-effects queue and the re-entrancy guard for [`flush_sync`].
pub(crate) struct Scheduler {
    pending: RefCell<VecDeque<NodeId>>,
    flushing: Cell<bool>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            pending: RefCell::new(VecDeque::new()),
            flushing: Cell::new(false),
        }
    }
}

/// Pushes `id` onto the pending queue unless it's already there (invariant I4: an effect is
/// scheduled at most once per dirtying wave). Dedup is the node's own `queued` flag rather than a
/// set membership check, since with it this is O(1) instead of O(queue length).
pub(crate) fn enqueue(root: &'static Root, id: NodeId) {
    let already_queued = root
        .nodes
        .borrow()
        .get(id)
        .map(|n| n.queued.replace(true))
        .unwrap_or(true);
    if !already_queued {
        root.scheduler.pending.borrow_mut().push_back(id);
    }
}

/// Drains the pending queue, running every effect still alive when its turn comes up. Re-entrant:
/// an effect body that writes a signal enqueues further effects into the very same queue, which
/// the outermost call keeps draining; a nested call sees `flushing` already set and returns
/// immediately without processing anything itself, avoiding double-draining or reordering.
#[cfg_attr(feature = "trace", tracing::instrument)]
pub fn flush_sync() {
    with_root(|root| {
        if root.scheduler.flushing.replace(true) {
            return;
        }
        let mut ran = 0usize;
        loop {
            let next = root.scheduler.pending.borrow_mut().pop_front();
            let Some(id) = next else { break };
            if let Some(n) = root.nodes.borrow_mut().get_mut(id) {
                n.queued.set(false);
            }
            run_effect(root, id);
            ran += 1;
        }
        #[cfg(feature = "trace")]
        tracing::trace!(ran, "flush_sync drained pending effects");
        root.scheduler.flushing.set(false);
    });
}

/// Runs one effect's body, applying the two ordering rules from §4.4 first.
///
/// **Nested-effect rule**: a parent effect must be re-entered (revalidated) before a child effect
/// created inside it, so the child never observes the parent's stale pre-recompute state. Before
/// running `id`, every non-`Clean` *ownership* ancestor that is itself an effect is revalidated,
/// outermost first.
///
/// **Zombie-effect rule**: if revalidating those ancestors didn't already dispose `id` (because one
/// of *them* owned it as a stale child), but some ownership ancestor is a scoped node (effect or
/// `{scoped: true}` computed) that is still `Dirty`/`Check`, `id` is skipped this cycle rather than
/// run against a scope that's about to be torn down by that ancestor's own eventual recompute.
///
/// `id` itself is driven through [`ensure_valid`] rather than unconditionally [`recompute`]d: an
/// effect can be enqueued while only `Check` (it is reachable from the write through an
/// intervening `computed`, not a direct observer of it -- see `graph::mark_dependents`), in which
/// case its sources are revalidated first and it only actually re-runs if one of them truly
/// changed, the same lazy-validation rule §4.3 gives every other computation.
fn run_effect(root: &'static Root, id: NodeId) {
    if !is_alive(root, id) {
        return;
    }
    for ancestor in non_clean_ancestor_effects(root, id) {
        if is_alive(root, ancestor) {
            ensure_valid(root, ancestor);
        }
    }
    if !is_alive(root, id) {
        return; // disposed as a stale child by one of the ancestor revalidations above.
    }
    if has_dirty_scoped_ancestor(root, id) {
        return;
    }
    ensure_valid(root, id);
}

fn is_alive(root: &'static Root, id: NodeId) -> bool {
    root.nodes
        .borrow()
        .get(id)
        .map(|n| n.state != NodeState::Disposed)
        .unwrap_or(false)
}

/// Ownership ancestors of `id` (nearest first) that are effects not currently `Clean`, reversed so
/// the outermost one comes first -- the order they must be re-run in.
fn non_clean_ancestor_effects(root: &'static Root, id: NodeId) -> Vec<NodeId> {
    let mut chain = Vec::new();
    let nodes = root.nodes.borrow();
    let mut current = match nodes.get(id) {
        Some(n) => n.parent,
        None => return chain,
    };
    while !current.is_null() {
        let Some(node) = nodes.get(current) else {
            break;
        };
        if node.kind == NodeKind::Effect && node.state != NodeState::Clean {
            chain.push(current);
        }
        current = node.parent;
    }
    chain.reverse();
    chain
}

/// True if some ownership ancestor of `id` is a scoped node (effect or `scoped: true` computed)
/// that is `Dirty`/`Check` -- it will dispose `id` as a stale child whenever it next recomputes.
fn has_dirty_scoped_ancestor(root: &'static Root, id: NodeId) -> bool {
    let nodes = root.nodes.borrow();
    let mut current = match nodes.get(id) {
        Some(n) => n.parent,
        None => return false,
    };
    while !current.is_null() {
        let Some(node) = nodes.get(current) else {
            return false;
        };
        if node.scoped && (node.state == NodeState::Dirty || node.state == NodeState::Check) {
            return true;
        }
        current = node.parent;
    }
    false
}

/// A handle returned by [`create_effect`] that stops the effect.
#[derive(Clone, Copy)]
pub struct EffectHandle(NodeId);

impl EffectHandle {
    /// Stops the effect: disposes its node (and anything it owns), running its pending cleanups
    /// LIFO first. After this call the effect never runs again, even if its old sources change.
    pub fn stop(self) {
        crate::graph::dispose_node(self.0);
    }
}

fn new_effect_node(mut f: impl FnMut() -> Option<Box<dyn FnOnce()>> + 'static) -> NodeId {
    with_root(|root| {
        let parent = root.current_node.get();
        let mut node = ReactiveNode::new(NodeKind::Effect, parent);
        node.scoped = true;
        node.state = NodeState::Inert;
        node.compute = Some(Box::new(move |slot| {
            if let Some(cleanup) = f() {
                // Registered on the effect's own (just-reset, per `reset_for_rerun`) scope, so it
                // runs before the *next* invocation and at final disposal (§4.5, §9 "Effects
                // returning a disposer").
                with_root(|root| {
                    let id = root.current_node.get();
                    crate::graph::push_cleanup(root, id, cleanup);
                });
            }
            // Marks "has completed at least one run", consulted by `computed::recompute` to
            // decide whether a later panic is a fatal first-run failure or an ordinary one.
            *slot = Some(Box::new(()));
            true
        }));
        let id = root.nodes.borrow_mut().insert(node);
        if !parent.is_null() {
            if let Some(p) = root.nodes.borrow_mut().get_mut(parent) {
                p.children.push(id);
            }
        }
        id
    })
}

/// Creates an effect that runs `f` for its side effects: once for its initial run, then again
/// every time one of the signals/computations it read last time changes.
///
/// The default (non-immediate) effect is created `Inert` and enqueued into the scheduler rather
/// than run inline (§4.4 "either enqueued immediately or executed inline if the caller asks");
/// [`schedule_flush`](crate::executor::schedule_flush) is then asked to drain the queue "soon",
/// which is synchronous unless a host has installed a real event-loop hook via
/// [`crate::executor::set_schedule_hook`] (see `executor.rs`). Use [`create_effect_immediate`] for
/// the `{immediate: true}` variant that runs inline during construction instead.
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_effect(mut f: impl FnMut() + 'static) -> EffectHandle {
    create_effect_with_cleanup(move || {
        f();
        None
    })
}

/// Creates an effect whose first run happens synchronously, inline, as part of this call --
/// spec.md §9 Open Question 1's `{immediate: true}` (bypasses the scheduler for the first run
/// only; subsequent re-runs triggered by source changes still go through the normal enqueue path
/// like any other effect).
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_effect_immediate(mut f: impl FnMut() + 'static) -> EffectHandle {
    create_effect_immediate_with_cleanup(move || {
        f();
        None
    })
}

/// Like [`create_effect`], but `f` may return a cleanup to run before its own next invocation and
/// at final disposal -- spec.md §9 "Effects returning a disposer": in source dialects without
/// static typing this is "if the return value is callable"; here it is the explicit
/// `Option<Box<dyn FnOnce()>>` that duck-typing would otherwise have to discover at runtime.
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_effect_with_cleanup(
    f: impl FnMut() -> Option<Box<dyn FnOnce()>> + 'static,
) -> EffectHandle {
    let id = new_effect_node(f);
    with_root(|root| enqueue(root, id));
    crate::executor::schedule_flush();
    EffectHandle(id)
}

/// The `{immediate: true}` counterpart to [`create_effect_with_cleanup`].
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_effect_immediate_with_cleanup(
    f: impl FnMut() -> Option<Box<dyn FnOnce()>> + 'static,
) -> EffectHandle {
    let id = new_effect_node(f);
    with_root(|root| recompute(root, id));
    EffectHandle(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computed::create_computed;
    use crate::graph::create_root;
    use crate::scope::create_child_scope;
    use crate::signal::create_signal;

    #[test]
    fn effect_reruns_when_its_source_is_a_computed_not_a_direct_signal() {
        // The effect never reads `a` directly: `a`'s write reaches it as a `Check` (through `b`),
        // not a `Dirty` (direct observer). It must still be enqueued and re-run once `b` actually
        // changes value (I3).
        create_root(|_| {
            let a = create_signal(0);
            let b = create_computed(move || a.get() + 1);
            let log = create_signal(0);
            create_effect(move || {
                log.set(b.get());
            });
            assert_eq!(log.get(), 1);
            a.set(10);
            flush_sync();
            assert_eq!(log.get(), 11);
        });
    }

    #[test]
    fn effect_runs_immediately_then_on_change() {
        create_root(|_| {
            let state = create_signal(0);
            let double = create_signal(-1);
            create_effect(move || {
                double.set(state.get() * 2);
            });
            assert_eq!(double.get(), 0);
            state.set(1);
            assert_eq!(double.get(), 2);
            state.set(2);
            assert_eq!(double.get(), 4);
        });
    }

    #[test]
    fn effect_cannot_create_infinite_loop() {
        create_root(|_| {
            let state = create_signal(0);
            create_effect(move || {
                state.track();
                state.set(0); // same value: no-op, no re-trigger.
            });
            state.set(0);
        });
    }

    #[test]
    fn effect_should_recreate_dependencies_each_time() {
        create_root(|_| {
            let condition = create_signal(true);
            let state1 = create_signal(0);
            let state2 = create_signal(1);
            let counter = create_signal(0);
            create_effect(move || {
                counter.set(counter.get_untracked() + 1);
                if condition.get() {
                    state1.track();
                } else {
                    state2.track();
                }
            });
            assert_eq!(counter.get(), 1);

            state1.set(1);
            assert_eq!(counter.get(), 2);

            state2.set(1);
            assert_eq!(counter.get(), 2); // not tracked this run.

            condition.set(false);
            assert_eq!(counter.get(), 3);

            state1.set(2);
            assert_eq!(counter.get(), 3); // no longer tracked.

            state2.set(2);
            assert_eq!(counter.get(), 4); // tracked after the condition flip.
        });
    }

    #[test]
    fn outer_effects_run_before_their_nested_effect_rebuilds() {
        create_root(|_| {
            let trigger = create_signal(());
            let outer_counter = create_signal(0);
            let inner_counter = create_signal(0);

            create_effect(move || {
                trigger.track();
                outer_counter.set(outer_counter.get_untracked() + 1);

                create_effect(move || {
                    trigger.track();
                    inner_counter.set(inner_counter.get_untracked() + 1);
                });
            });

            assert_eq!(outer_counter.get(), 1);
            assert_eq!(inner_counter.get(), 1);

            trigger.set(());

            assert_eq!(outer_counter.get(), 2);
            assert_eq!(inner_counter.get(), 2);
        });
    }

    #[test]
    fn disposing_scope_stops_its_effects() {
        create_root(|_| {
            let counter = create_signal(0);
            let trigger = create_signal(());

            let (_, child) = create_child_scope(move || {
                create_effect(move || {
                    trigger.track();
                    counter.set(counter.get_untracked() + 1);
                });
            });

            assert_eq!(counter.get(), 1);
            trigger.set(());
            assert_eq!(counter.get(), 2);

            child.dispose();
            trigger.set(());
            assert_eq!(counter.get(), 2); // disposed effect no longer runs.
        });
    }

    #[test]
    fn stop_handle_disposes_just_that_effect() {
        create_root(|_| {
            let counter = create_signal(0);
            let trigger = create_signal(());
            let handle = create_effect(move || {
                trigger.track();
                counter.set(counter.get_untracked() + 1);
            });
            assert_eq!(counter.get(), 1);
            handle.stop();
            trigger.set(());
            assert_eq!(counter.get(), 1);
        });
    }

    #[test]
    fn returned_disposer_runs_before_next_invocation_and_at_disposal() {
        create_root(|_| {
            let trigger = create_signal(0);
            let teardown_count = create_signal(0);
            let handle = create_effect_with_cleanup(move || {
                let n = trigger.get();
                Some(Box::new(move || {
                    teardown_count.set(teardown_count.get_untracked() + 1);
                    let _ = n;
                }) as Box<dyn FnOnce()>)
            });
            assert_eq!(teardown_count.get(), 0);
            trigger.set(1);
            assert_eq!(teardown_count.get(), 1); // ran before the second invocation.
            handle.stop();
            assert_eq!(teardown_count.get(), 2); // and again at disposal.
        });
    }
}
