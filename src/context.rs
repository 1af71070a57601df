//! String/symbol-keyed, copy-on-write context propagation.
//!
//! Unlike the teacher's original `TypeId`-keyed, one-value-per-type context (see the historical
//! `provide_context`/`use_context` pair this module replaces), contexts here are keyed by an
//! arbitrary [`ContextKey`] so multiple values of the same Rust type can coexist under different
//! names, matching the spec's "key (string or opaque symbol)" data model. The walk-up-parent-
//! chain lookup algorithm and the "writes never leak to parent or sibling" isolation guarantee
//! are carried over unchanged.

use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

use crate::graph;
use crate::node::NodeId;

/// A context lookup key. Either an interned string name or an opaque, identity-compared symbol
/// (use [`ContextKey::symbol`] when two call sites must not accidentally collide on the same
/// string).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ContextKey {
    /// A named key; two call sites using the same name collide by design.
    Name(&'static str),
    /// An opaque, identity-compared key minted by [`ContextKey::symbol`].
    Symbol(usize),
}

impl From<&'static str> for ContextKey {
    fn from(s: &'static str) -> Self {
        ContextKey::Name(s)
    }
}

impl ContextKey {
    /// Mints a process-wide unique symbol key, guaranteed not to collide with any `Name` key or
    /// any other symbol.
    pub fn symbol() -> Self {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        ContextKey::Symbol(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// The map a scope's `context` field stores. Shared via `Rc` between a scope and any descendant
/// that has not yet written its own entry, giving copy-on-write semantics without eagerly
/// cloning on every child scope creation.
pub(crate) type ContextMap = HashMap<ContextKey, Rc<dyn Any>>;

/// Writes `value` under `key` into the given node's own context map.
///
/// If the node has no map of its own yet, one is created: cloned from the nearest ancestor's map
/// if one exists (so existing entries remain visible), or empty otherwise. Because the clone only
/// happens once per scope (on that scope's first write) and is shared thereafter via `Rc`, a long
/// chain of scopes that never call `set_context` costs nothing.
pub(crate) fn set_context_on(node: NodeId, key: ContextKey, value: Rc<dyn Any>) {
    graph::with_root(|root| {
        let inherited = {
            let nodes = root.nodes.borrow();
            nodes
                .get(node)
                .and_then(|n| n.context.clone())
                .or_else(|| find_ancestor_context(&nodes, node))
        };
        let mut nodes = root.nodes.borrow_mut();
        let Some(this) = nodes.get_mut(node) else {
            return;
        };
        let map = this
            .context
            .get_or_insert_with(|| inherited.unwrap_or_default());
        Rc::make_mut(map).insert(key, value);
    });
}

fn find_ancestor_context(
    nodes: &slotmap::SlotMap<NodeId, crate::node::ReactiveNode>,
    start: NodeId,
) -> Option<Rc<ContextMap>> {
    let mut current = nodes.get(start)?.parent;
    while !current.is_null() {
        let node = nodes.get(current)?;
        if let Some(map) = &node.context {
            return Some(map.clone());
        }
        current = node.parent;
    }
    None
}

/// Looks up `key` starting at `node` and walking ancestors. A child's own `set_context` call is
/// never visible to its parent or siblings (isolation guarantee); it is only ever visible to the
/// scope it was written in and that scope's descendants.
pub(crate) fn get_context_on(node: NodeId, key: &ContextKey) -> Option<Rc<dyn Any>> {
    graph::with_root(|root| {
        let nodes = root.nodes.borrow();
        let mut current = node;
        loop {
            let this = nodes.get(current)?;
            if let Some(map) = &this.context {
                if let Some(value) = map.get(key) {
                    return Some(value.clone());
                }
            }
            if this.parent.is_null() {
                return None;
            }
            current = this.parent;
        }
    })
}

/// Sets a context value in the currently running scope.
///
/// # Panics
/// Panics if called outside any scope.
#[cfg_attr(debug_assertions, track_caller)]
pub fn set_context<T: 'static>(key: impl Into<ContextKey>, value: T) {
    let node = graph::current_scope_id();
    assert!(!node.is_null(), "set_context called outside any scope");
    set_context_on(node, key.into(), Rc::new(value));
}

/// Gets a context value visible from the currently running scope, walking ancestors.
pub fn get_context<T: 'static>(key: impl Into<ContextKey>) -> Option<std::rc::Rc<T>> {
    let node = graph::current_scope_id();
    if node.is_null() {
        return None;
    }
    let value = get_context_on(node, &key.into())?;
    // `Rc<dyn Any>` -> `Rc<T>` requires the underlying allocation's type to match exactly.
    value.downcast::<T>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::create_root;
    use crate::scope::create_child_scope;

    #[test]
    fn context_visible_in_same_and_child_scope() {
        create_root(|_| {
            set_context("answer", 42i32);
            assert_eq!(*get_context::<i32>("answer").unwrap(), 42);

            create_child_scope(|| {
                assert_eq!(*get_context::<i32>("answer").unwrap(), 42);
            });
        });
    }

    #[test]
    fn context_write_in_child_does_not_leak_to_parent_or_sibling() {
        create_root(|_| {
            set_context("answer", 1i32);

            create_child_scope(|| {
                set_context("answer", 2i32);
                assert_eq!(*get_context::<i32>("answer").unwrap(), 2);
            });

            // Parent scope still sees its own value.
            assert_eq!(*get_context::<i32>("answer").unwrap(), 1);

            create_child_scope(|| {
                // A fresh sibling never saw the first child's write.
                assert_eq!(*get_context::<i32>("answer").unwrap(), 1);
            });
        });
    }

    #[test]
    fn missing_context_is_none() {
        create_root(|_| {
            assert!(get_context::<i32>("missing").is_none());
        });
    }
}
