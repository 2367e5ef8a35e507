//! Per-call panic isolation.
//!
//! One failing participant must never halt its siblings, so every foreign
//! callback the crate runs goes through [`run_isolated`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Extracts a printable message from a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs `f`, catching and logging a panic instead of propagating it.
///
/// Returns `true` if `f` completed normally.
pub fn run_isolated<F: FnOnce()>(context: &str, f: F) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            tracing::error!(context, panic = %panic_message(payload.as_ref()), "isolated panic");
            false
        }
    }
}
