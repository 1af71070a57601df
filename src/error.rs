//! Error taxonomy and the scope error-handler chain.
//!
//! Rust has no exceptions, so a `computed`/`effect` body "throwing" is modeled as a panic caught
//! locally with [`std::panic::catch_unwind`] at the computation boundary, the same idiom used
//! elsewhere in this pack for catching user closures at a reaction boundary (see e.g.
//! `compose-core`'s `ErrorBoundary`). The caught payload is handed to the nearest scope's
//! `on_error` chain; if every handler rethrows, the error keeps walking up the ownership tree.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use thiserror::Error;

use crate::node::NodeId;

/// An error produced while running a `computed` or `effect` body.
#[derive(Error, Debug)]
pub enum ReactiveError {
    /// A `computed` or `effect` body panicked.
    #[error("reactive computation failed: {message}")]
    Compute {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    /// A computation was read while already on the reader stack (debug builds only).
    #[error("cyclic reactive dependency detected: {chain}")]
    Cycle { chain: String },
    /// A `computed` with no `initial` value panicked on its very first evaluation.
    #[error("first run of computation failed with no fallback value: {message}")]
    FirstRunFailure { message: String },
}

/// A handler registered via `on_error`. Returns `true` if it absorbed the error, `false` to let
/// it keep propagating to the parent scope.
///
/// Held behind an `Rc` (rather than `Box`) so [`dispatch_error`] can clone a handler out of the
/// node arena, drop its borrow, and invoke the handler without holding a `RefCell` borrow across
/// user code that might itself touch the graph.
#[derive(Clone)]
pub(crate) struct ErrorHandler(pub Rc<dyn Fn(&ReactiveError) -> bool>);

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErrorHandler(..)")
    }
}

/// Runs `f`, converting any panic into a [`ReactiveError::Compute`] instead of unwinding through
/// the reactive graph's own stack frames.
pub(crate) fn catch_compute<T>(f: impl FnOnce() -> T) -> Result<T, ReactiveError> {
    std::panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        ReactiveError::Compute {
            message: panic_message(&payload),
            source: None,
        }
    })
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Walks the owner chain starting at `start`, nearest scope first, trying each registered
/// `on_error` handler in registration order. Returns `true` if some handler absorbed the error.
/// If every handler along the way rethrows (or none exist), the error is not absorbed and the
/// caller is expected to resume the unwind (root-level unhandled error, per the "user-visible
/// behavior" contract).
pub(crate) fn dispatch_error(start: NodeId, err: &ReactiveError) -> bool {
    crate::graph::with_root(|root| {
        let mut current = start;
        loop {
            let handlers: Vec<ErrorHandler> = {
                let nodes = root.nodes.borrow();
                match nodes.get(current) {
                    Some(node) => node.error_handlers.clone(),
                    None => Vec::new(),
                }
            };
            for handler in &handlers {
                if (handler.0)(err) {
                    return true;
                }
            }
            let parent = {
                let nodes = root.nodes.borrow();
                match nodes.get(current) {
                    Some(node) => node.parent,
                    None => return false,
                }
            };
            if parent.is_null() {
                return false;
            }
            current = parent;
        }
    })
}
