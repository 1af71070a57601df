//! Pluggable scheduling for the "microtask" half of the effect scheduler (§4.4, §5).
//!
//! Grounded in `any_spawner::Executor` (the Leptos workspace's single global,
//! function-pointer-based executor registry): this crate has no event loop of its own, so
//! "schedule a microtask" is a single overridable hook rather than a real async boundary. The
//! default hook -- used whenever a host never calls [`set_schedule_hook`] -- runs the flush
//! synchronously right away, the same trade-off `leptos_reactive::spawn_microtask` makes outside
//! `wasm32` (there is no task queue to defer onto, so "after this task" collapses to "now"). On
//! `wasm32` with the `wasm-bindgen` feature enabled, the default hook instead defers onto the
//! browser's real microtask queue via `queueMicrotask`, giving genuine batching of same-tick
//! writes the way spec.md §4.4 describes.

use std::sync::OnceLock;

use thiserror::Error;

/// A schedule hook: called once per dirtying wave (when the pending queue goes from empty to
/// non-empty) to arrange for [`crate::effect::flush_sync`] to run "soon".
type ScheduleFn = fn();

static SCHEDULE_FN: OnceLock<ScheduleFn> = OnceLock::new();

/// Errors from configuring the global scheduling hook.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// [`set_schedule_hook`] was called more than once.
    #[error("a reactive-graph schedule hook has already been set")]
    AlreadySet,
}

/// Overrides how a flush is scheduled once triggered. A host with a real event loop (tokio,
/// async-std, a GUI main loop) can use this to genuinely defer the flush instead of running it
/// synchronously inline with the triggering `set`. Can only be called once; later calls return
/// [`ExecutorError::AlreadySet`].
pub fn set_schedule_hook(f: ScheduleFn) -> Result<(), ExecutorError> {
    SCHEDULE_FN.set(f).map_err(|_| ExecutorError::AlreadySet)
}

/// Arranges for the pending effect queue to be drained "soon" -- immediately, unless a host hook
/// or the `wasm-bindgen` default says otherwise.
pub(crate) fn schedule_flush() {
    match SCHEDULE_FN.get() {
        Some(f) => f(),
        None => default_schedule(),
    }
}

#[cfg(not(all(target_arch = "wasm32", feature = "wasm-bindgen")))]
fn default_schedule() {
    crate::effect::flush_sync();
}

#[cfg(all(target_arch = "wasm32", feature = "wasm-bindgen"))]
fn default_schedule() {
    use wasm_bindgen::prelude::*;

    #[wasm_bindgen]
    extern "C" {
        #[wasm_bindgen(js_name = queueMicrotask)]
        fn queue_microtask_js(callback: &JsValue);
    }

    let closure = Closure::once(crate::effect::flush_sync as fn());
    queue_microtask_js(closure.as_ref());
    closure.forget();
}
