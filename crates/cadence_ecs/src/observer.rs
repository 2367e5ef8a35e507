//! # Observer Channels
//!
//! Publish/subscribe lists used for entity and manager notifications.
//!
//! Every subscription returns a [`SubscriptionId`]; unsubscribing with it is
//! deterministic, and a removed callback never runs again once
//! `unsubscribe` has returned, except for a notification already in flight
//! on another thread.
//!
//! Callbacks run outside the internal lock, on a snapshot of the list, so a
//! callback may subscribe or unsubscribe freely. A panicking callback is
//! logged and does not stop the others.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cadence_async::run_isolated;
use parking_lot::RwLock;

/// Handle of one subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Ordered list of callbacks receiving `&A`.
pub struct Observers<A> {
    next_id: AtomicU64,
    callbacks: RwLock<Vec<(SubscriptionId, Callback<A>)>>,
}

impl<A> Observers<A> {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Adds a callback.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.write().push((id, Arc::new(callback)));
        id
    }

    /// Removes a callback. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(sub, _)| *sub != id);
        callbacks.len() != before
    }

    /// Invokes every callback with `args`, in subscription order.
    pub fn notify(&self, args: &A) {
        let snapshot: Vec<Callback<A>> = self
            .callbacks
            .read()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in snapshot {
            run_isolated("observer", || callback(args));
        }
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Returns true if nobody is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }

    /// Drops every subscription.
    pub fn clear(&self) {
        self.callbacks.write().clear();
    }
}

impl<A> Default for Observers<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> std::fmt::Debug for Observers<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_notify_and_unsubscribe() {
        let observers: Observers<u32> = Observers::new();
        let sum = Arc::new(AtomicUsize::new(0));

        let id = {
            let sum = Arc::clone(&sum);
            observers.subscribe(move |v| {
                sum.fetch_add(*v as usize, Ordering::SeqCst);
            })
        };
        observers.notify(&3);
        assert!(observers.unsubscribe(id));
        assert!(!observers.unsubscribe(id));
        observers.notify(&4);

        assert_eq!(sum.load(Ordering::SeqCst), 3);
        assert!(observers.is_empty());
    }

    #[test]
    fn test_panicking_callback_is_isolated() {
        let observers: Observers<()> = Observers::new();
        let hits = Arc::new(AtomicUsize::new(0));
        observers.subscribe(|()| panic!("observer failure"));
        {
            let hits = Arc::clone(&hits);
            observers.subscribe(move |()| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        observers.notify(&());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let observers: Arc<Observers<()>> = Arc::new(Observers::new());
        let own_id = Arc::new(parking_lot::Mutex::new(None));

        let id = {
            let weak = Arc::downgrade(&observers);
            let own_id = Arc::clone(&own_id);
            observers.subscribe(move |()| {
                if let (Some(observers), Some(id)) = (weak.upgrade(), *own_id.lock()) {
                    observers.unsubscribe(id);
                }
            })
        };
        *own_id.lock() = Some(id);

        observers.notify(&());
        assert!(observers.is_empty());
    }
}
