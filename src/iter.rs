//! Reactive utilities for mapping a list signal into another, diffing old/new elements so that
//! only the entries that actually changed get re-mapped (and their per-entry scopes torn down and
//! recreated).
//!
//! Ported from the teacher's `map_keyed`/`map_indexed` (credited there to the SolidJS
//! `indexArray`/`mapArray` implementation) onto the new engine. The diffing algorithm itself
//! (common-prefix/suffix skip, then a backwards index scan for moved keys) is carried over
//! unchanged; what's dropped is the teacher's `unsafe { transmute }` dance for borrowing an arena
//! scope of the right lifetime -- `create_child_scope` here just returns the mapped value
//! directly, since nothing is arena-allocated anymore.

use std::collections::HashMap;
use std::hash::Hash;
use std::rc::Rc;

use crate::effect::create_effect;
use crate::node::NodeHandle;
use crate::scope::create_child_scope;
use crate::signal::{create_signal, ReadSignal};

/// Maps a `Vec` signal to another, diffing elements by key so that unchanged entries are not
/// re-mapped. `key_fn` must return a value that uniquely identifies each element.
///
/// The returned signal is itself the product of an effect: it updates whenever `list` does, not
/// lazily on read, since each entry's map body owns a disposable scope that must be torn down
/// promptly when its entry disappears rather than whenever someone next happens to read the list.
pub fn keyed_map<T, K, U>(
    list: ReadSignal<Vec<T>>,
    map_fn: impl Fn(T) -> U + 'static,
    key_fn: impl Fn(&T) -> K + 'static,
) -> ReadSignal<Vec<U>>
where
    T: Eq + Clone + 'static,
    K: Eq + Hash + 'static,
    U: Clone + 'static,
{
    let map_fn = Rc::new(map_fn);
    let key_fn = Rc::new(key_fn);

    let mut items: Rc<Vec<T>> = Rc::new(Vec::new());
    let mut mapped: Vec<U> = Vec::new();
    let mut handles: Vec<Option<NodeHandle>> = Vec::new();

    let signal = create_signal(Vec::new());

    create_effect(move || {
        let new_items = Rc::new(list.get());

        if new_items.is_empty() {
            for handle in handles.drain(..).flatten() {
                handle.dispose();
            }
            mapped = Vec::new();
        } else if items.is_empty() {
            for item in new_items.iter().cloned() {
                let map_fn = map_fn.clone();
                let (value, handle) = create_child_scope(move || map_fn(item));
                mapped.push(value);
                handles.push(Some(handle));
            }
        } else {
            let min_len = usize::min(items.len(), new_items.len());
            let start = items
                .iter()
                .zip(new_items.iter())
                .position(|(a, b)| a != b)
                .unwrap_or(min_len);

            let mut end = items.len();
            let mut new_end = new_items.len();
            while end > start && new_end > start && items[end - 1] == new_items[new_end - 1] {
                end -= 1;
                new_end -= 1;
            }

            // Index new_items[start..new_end] by key, scanning backwards so ties resolve to the
            // earliest matching occurrence.
            let mut new_indices: HashMap<K, usize> = HashMap::with_capacity(new_end - start);
            for j in (start..new_end).rev() {
                new_indices.insert(key_fn(&new_items[j]), j);
            }

            let mut temp: Vec<Option<U>> = vec![None; new_items.len()];
            let mut temp_handles: Vec<Option<NodeHandle>> = (0..new_items.len()).map(|_| None).collect();

            // Common prefix: carry over unchanged (identical item at the same position, so the
            // previously mapped value and its scope are still correct).
            for i in 0..start {
                temp[i] = Some(mapped[i].clone());
                temp_handles[i] = handles[i];
            }

            // Common suffix: carry over unchanged.
            for k in 0..(items.len() - end) {
                temp[new_end + k] = Some(mapped[end + k].clone());
                temp_handles[new_end + k] = handles[end + k];
            }

            // Old items in the changed middle: if their key still exists in new_items, they moved.
            for i in start..end {
                if let Some(&j) = new_indices.get(&key_fn(&items[i])) {
                    temp[j] = Some(mapped[i].clone());
                    temp_handles[j] = handles[i];
                    handles[i] = None; // claimed: don't dispose it below.
                }
            }

            // Anything left in `handles[start..end]` was not claimed above: its key disappeared.
            for handle in handles[start..end].iter_mut().flatten() {
                handle.dispose();
            }

            // Fill in the gaps with freshly mapped entries.
            for j in start..new_items.len() {
                if temp[j].is_none() {
                    let map_fn = map_fn.clone();
                    let new_item = new_items[j].clone();
                    let (value, handle) = create_child_scope(move || map_fn(new_item));
                    temp[j] = Some(value);
                    temp_handles[j] = Some(handle);
                }
            }

            mapped = temp.into_iter().map(|v| v.expect("every slot filled")).collect();
            handles = temp_handles;
        }

        items = new_items;
        signal.set(mapped.clone());
    });

    signal.read_only()
}

/// Maps a `Vec` signal to another by index: position `i` is only re-mapped when
/// `new_items[i] != old_items[i]` (or the list grew). Simpler and cheaper than [`keyed_map`] when
/// there is no natural key, at the cost of re-mapping every entry after the first point of change
/// when an item is inserted/removed in the middle rather than at the end.
pub fn map<T, U>(list: ReadSignal<Vec<T>>, map_fn: impl Fn(T) -> U + 'static) -> ReadSignal<Vec<U>>
where
    T: PartialEq + Clone + 'static,
    U: Clone + 'static,
{
    let map_fn = Rc::new(map_fn);

    let mut items: Rc<Vec<T>> = Rc::new(Vec::new());
    let mut mapped: Vec<U> = Vec::new();
    let mut handles: Vec<NodeHandle> = Vec::new();

    let signal = create_signal(Vec::new());

    create_effect(move || {
        let new_items = list.get();

        if new_items.is_empty() {
            for handle in handles.drain(..) {
                handle.dispose();
            }
            items = Rc::new(Vec::new());
            mapped = Vec::new();
        } else {
            for (i, new_item) in new_items.iter().enumerate() {
                let unchanged = items.get(i) == Some(new_item);
                if unchanged {
                    continue;
                }
                let map_fn = map_fn.clone();
                let new_item = new_item.clone();
                let (value, handle) = create_child_scope(move || map_fn(new_item));
                if let Some(old_handle) = handles.get(i).copied() {
                    old_handle.dispose();
                    mapped[i] = value;
                    handles[i] = handle;
                } else {
                    mapped.push(value);
                    handles.push(handle);
                }
            }
            for handle in handles.drain(new_items.len()..) {
                handle.dispose();
            }
            mapped.truncate(new_items.len());
            items = Rc::new(new_items);
        }

        signal.set(mapped.clone());
    });

    signal.read_only()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::create_root;
    use crate::signal::create_signal as new_signal;

    #[test]
    fn keyed_reuses_entries_by_key() {
        create_root(|_| {
            let list = new_signal(vec![1, 2, 3]);
            let runs = new_signal(0);
            let mapped = keyed_map(
                list.read_only(),
                move |x| {
                    runs.update(|r| *r += 1);
                    x * 2
                },
                |x| *x,
            );
            assert_eq!(mapped.get(), vec![2, 4, 6]);
            assert_eq!(runs.get_untracked(), 3);

            list.set(vec![1, 2, 3, 4]);
            assert_eq!(mapped.get(), vec![2, 4, 6, 8]);
            assert_eq!(runs.get_untracked(), 4); // only the new element re-ran.

            list.set(vec![2, 1, 3, 4]);
            assert_eq!(mapped.get(), vec![4, 2, 6, 8]);
            assert_eq!(runs.get_untracked(), 4); // pure reorder: nothing re-ran.
        });
    }

    #[test]
    fn keyed_disposes_removed_entries() {
        create_root(|_| {
            let list = new_signal(vec![1, 2, 3]);
            let drops = new_signal(0);
            let mapped = keyed_map(
                list.read_only(),
                move |x| {
                    crate::signal::on_cleanup(move || drops.update(|d| *d += 1));
                    x
                },
                |x| *x,
            );
            assert_eq!(mapped.get(), vec![1, 2, 3]);
            list.set(vec![1, 3]);
            assert_eq!(mapped.get(), vec![1, 3]);
            assert_eq!(drops.get_untracked(), 1);
        });
    }

    #[test]
    fn indexed_only_remaps_changed_positions() {
        create_root(|_| {
            let list = new_signal(vec![1, 2, 3]);
            let runs = new_signal(0);
            let mapped = map(list.read_only(), move |x| {
                runs.update(|r| *r += 1);
                x * 10
            });
            assert_eq!(mapped.get(), vec![10, 20, 30]);
            assert_eq!(runs.get_untracked(), 3);

            list.set(vec![1, 99, 3]);
            assert_eq!(mapped.get(), vec![10, 990, 30]);
            assert_eq!(runs.get_untracked(), 4);
        });
    }
}
