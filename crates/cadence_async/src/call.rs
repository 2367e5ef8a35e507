//! # Thread Participants
//!
//! Anything driven by a [`NativeThread`](crate::NativeThread) implements
//! [`AsyncCall`]. Each loop iteration calls `update` on every participant,
//! then `late_update` on every participant, in registration order.

use std::sync::Arc;
use std::time::Duration;

/// A participant of a native thread's update loop.
///
/// `delay` is the measured duration of the previous loop iteration
/// (work plus sleep), i.e. the real time step of the thread.
pub trait AsyncCall: Send + Sync {
    /// Whether `update` should be called this iteration.
    fn update_enabled(&self) -> bool {
        true
    }

    /// Called once per loop iteration.
    fn update(&self, delay: Duration);

    /// Whether `late_update` should be called this iteration.
    fn late_update_enabled(&self) -> bool {
        false
    }

    /// Called once per loop iteration, after every participant's `update`.
    fn late_update(&self, _delay: Duration) {}
}

/// Shared participant handle.
pub type CallHandle = Arc<dyn AsyncCall>;

/// Identity comparison of two participant handles.
#[inline]
#[must_use]
pub fn same_call(a: &CallHandle, b: &CallHandle) -> bool {
    Arc::ptr_eq(a, b)
}
