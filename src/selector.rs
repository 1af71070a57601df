//! `create_selector`: a way to subscribe to "is the source equal to `key`" without paying an
//! O(observers) cost on every change the way a naive `computed(|| source.get() == key)` per
//! observer would (§9 design note).
//!
//! Grounded in the teacher's `create_selector`/`create_selector_with` (`memos.rs`), reshaped per
//! spec.md's design note: one upstream watcher effect holds the *previous* key's and *new* key's
//! boolean signals and flips exactly the two that actually changed, rather than every caller
//! re-running its own comparison.

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::Rc;

use crate::effect::create_effect;
use crate::signal::{create_signal, ReadSignal, Signal};

/// Returns a function `key -> ReadSignal<bool>` that is `true` exactly when `source`'s current
/// value equals `key`. Internally, changing `source` from `a` to `b` flips only the two boolean
/// signals for `a` and `b` (if anyone is watching them) rather than notifying every observer of
/// every key ever requested.
pub fn create_selector<T>(source: ReadSignal<T>) -> impl Fn(T) -> ReadSignal<bool>
where
    T: PartialEq + Eq + Hash + Clone + 'static,
{
    let flags: Rc<RefCell<HashMap<T, Signal<bool>>>> = Rc::new(RefCell::new(HashMap::new()));
    let previous: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));

    {
        let flags = flags.clone();
        let previous = previous.clone();
        create_effect(move || {
            let current = source.get();
            let mut previous = previous.borrow_mut();
            if previous.as_ref() != Some(&current) {
                let flags = flags.borrow();
                if let Some(old_key) = previous.as_ref() {
                    if let Some(flag) = flags.get(old_key) {
                        flag.set(false);
                    }
                }
                if let Some(flag) = flags.get(&current) {
                    flag.set(true);
                }
            }
            *previous = Some(current);
        });
    }

    move |key: T| {
        let mut flags_mut = flags.borrow_mut();
        let is_current = previous.borrow().as_ref() == Some(&key);
        let signal = flags_mut
            .entry(key)
            .or_insert_with(|| create_signal(is_current));
        signal.read_only()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::create_root;

    #[test]
    fn selector_flips_only_the_two_affected_keys() {
        create_root(|_| {
            let source = create_signal(1);
            let is_selected = create_selector(source.read_only());

            let sel1 = is_selected(1);
            let sel2 = is_selected(2);
            let sel3 = is_selected(3);

            assert!(sel1.get());
            assert!(!sel2.get());
            assert!(!sel3.get());

            source.set(2);

            assert!(!sel1.get());
            assert!(sel2.get());
            assert!(!sel3.get());
        });
    }

    #[test]
    fn selector_for_a_never_selected_key_starts_false() {
        create_root(|_| {
            let source = create_signal(1);
            let is_selected = create_selector(source.read_only());
            assert!(!is_selected(99).get());
        });
    }
}
