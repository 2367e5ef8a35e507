//! # Delegate Queue
//!
//! Per-thread marshaling of arbitrary callables onto their owning thread.
//!
//! ## Architecture
//!
//! ```text
//!   Thread 1 ──┐                 ┌──────────────────────┐
//!   Thread 2 ──┼── execute() ──> │ default   (1 / tick) │──┐
//!   Thread N ──┘                 └──────────────────────┘  │   drain()
//!              ── important() ─> ┌──────────────────────┐  ├──> owning thread
//!                                │ important (≤ limit)  │──┘
//!                                └──────────────────────┘
//! ```
//!
//! Enqueueing is lock-free (crossbeam channels) and safe from any thread.
//! Draining happens only on the owning thread's own tick: the first thread
//! to call [`DelegateQueue::drain`] becomes the owner.

use std::sync::OnceLock;
use std::thread::{self, ThreadId};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::call::AsyncCall;
use crate::isolate::run_isolated;

/// Default per-tick cap of the important queue.
pub const DEFAULT_IMPORTANT_LIMIT: usize = 100;

/// A boxed callable marshaled onto another thread.
pub type Delegate = Box<dyn FnOnce() + Send + 'static>;

/// Priority tier of an enqueued delegate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Best effort: at most one default delegate runs per tick.
    Default,
    /// Guaranteed: drained up to the important limit every tick.
    #[default]
    Important,
}

/// Counts of delegates run by one [`DelegateQueue::drain`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Default-tier delegates executed (0 or 1).
    pub default_run: usize,
    /// Important-tier delegates executed.
    pub important_run: usize,
    /// Delegates that panicked (isolated and logged).
    pub failed: usize,
}

/// Two-tier FIFO of callables owned by one thread.
pub struct DelegateQueue {
    /// Queue name used in logs.
    name: String,
    default_tx: Sender<Delegate>,
    default_rx: Receiver<Delegate>,
    important_tx: Sender<Delegate>,
    important_rx: Receiver<Delegate>,
    /// Maximum important delegates run per tick.
    important_limit: usize,
    /// Thread that drains this queue; set on first drain.
    owner: OnceLock<ThreadId>,
}

impl DelegateQueue {
    /// Creates a queue with the default important limit.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_limit(name, DEFAULT_IMPORTANT_LIMIT)
    }

    /// Creates a queue draining at most `important_limit` important
    /// delegates per tick. A limit of zero is raised to one.
    #[must_use]
    pub fn with_limit(name: impl Into<String>, important_limit: usize) -> Self {
        let (default_tx, default_rx) = unbounded();
        let (important_tx, important_rx) = unbounded();
        Self {
            name: name.into(),
            default_tx,
            default_rx,
            important_tx,
            important_rx,
            important_limit: important_limit.max(1),
            owner: OnceLock::new(),
        }
    }

    /// Returns the queue name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the per-tick important limit.
    #[inline]
    #[must_use]
    pub const fn important_limit(&self) -> usize {
        self.important_limit
    }

    /// Enqueues a best-effort delegate. It may not run on the next tick.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Priority::Default, Box::new(f));
    }

    /// Enqueues a delegate guaranteed to run within the bounded drain.
    pub fn important_execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Priority::Important, Box::new(f));
    }

    /// Enqueues a boxed delegate on the given tier.
    pub fn enqueue(&self, priority: Priority, delegate: Delegate) {
        let tx = match priority {
            Priority::Default => &self.default_tx,
            Priority::Important => &self.important_tx,
        };
        // Both ends live in `self`; the channel can't be disconnected here.
        let _ = tx.send(delegate);
    }

    /// Runs one tick worth of delegates on the calling thread.
    ///
    /// At most one default delegate, then up to `important_limit` important
    /// delegates. A panicking delegate is logged and does not stop the drain.
    pub fn drain(&self) -> DrainStats {
        let _ = self.owner.get_or_init(|| thread::current().id());
        let mut stats = DrainStats::default();

        if let Ok(delegate) = self.default_rx.try_recv() {
            stats.default_run = 1;
            if !run_isolated(&self.name, delegate) {
                stats.failed += 1;
            }
        }

        while stats.important_run < self.important_limit {
            let Ok(delegate) = self.important_rx.try_recv() else {
                break;
            };
            stats.important_run += 1;
            if !run_isolated(&self.name, delegate) {
                stats.failed += 1;
            }
        }

        if stats.default_run + stats.important_run > 0 {
            tracing::trace!(
                queue = %self.name,
                default = stats.default_run,
                important = stats.important_run,
                "drained delegates"
            );
        }
        stats
    }

    /// Number of pending default delegates.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.default_rx.len()
    }

    /// Number of pending important delegates.
    #[inline]
    #[must_use]
    pub fn important_len(&self) -> usize {
        self.important_rx.len()
    }

    /// Returns true if both tiers are empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.default_rx.is_empty() && self.important_rx.is_empty()
    }

    /// Drops every pending default delegate without running it.
    pub fn clear_default(&self) {
        while self.default_rx.try_recv().is_ok() {}
    }

    /// Drops every pending important delegate without running it.
    pub fn clear_important(&self) {
        while self.important_rx.try_recv().is_ok() {}
    }

    /// Drops every pending delegate.
    pub fn clear(&self) {
        self.clear_default();
        self.clear_important();
    }

    /// Thread that drains this queue, once it has drained at least once.
    #[inline]
    #[must_use]
    pub fn owner_thread(&self) -> Option<ThreadId> {
        self.owner.get().copied()
    }

    /// Returns true if the calling thread is the owning thread.
    #[inline]
    #[must_use]
    pub fn is_owner_thread(&self) -> bool {
        self.owner.get() == Some(&thread::current().id())
    }

    /// Binds the owner to the calling thread before the first drain.
    ///
    /// Returns false if another thread already owns the queue.
    pub fn claim_owner(&self) -> bool {
        let current = thread::current().id();
        *self.owner.get_or_init(|| current) == current
    }
}

impl std::fmt::Debug for DelegateQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegateQueue")
            .field("name", &self.name)
            .field("pending", &self.len())
            .field("important_pending", &self.important_len())
            .field("important_limit", &self.important_limit)
            .finish()
    }
}

impl AsyncCall for DelegateQueue {
    fn update(&self, _delay: Duration) {
        self.drain();
    }
}
