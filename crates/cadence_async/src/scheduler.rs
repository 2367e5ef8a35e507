//! # Named-Thread Scheduler
//!
//! Routes a periodic "advance by delta time" call to every entry point
//! registered under one `(thread name, cadence)` pair.
//!
//! ```text
//!   register_entry_point("Systems thread", f, 50)
//!        │
//!        ▼
//!   SystemsDispatcher ── key "Systems thread@50ms" ──> Scheduler ──┐
//!                                                      (AsyncCall)  │ participant of
//!                                                                   ▼
//!                                   NativeThread "Systems thread@50ms", delay 50 ms
//! ```
//!
//! The reserved thread name [`MAIN_THREAD`] has a single scheduler that no
//! native thread drives; the host pumps it with
//! [`SystemsDispatcher::tick_main`], which also drains the main delegate
//! queue handed out by `ThreadRegistry::dispatcher(MAIN_THREAD)`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::call::{AsyncCall, CallHandle};
use crate::error::AsyncResult;
use crate::isolate::run_isolated;
use crate::registry::ThreadRegistry;

/// Cadence used when a caller names none, in milliseconds.
pub const DEFAULT_DELAY_MS: u64 = 50;

/// Reserved thread name pumped by the host instead of a native thread.
pub const MAIN_THREAD: &str = "main";

/// A scheduled callback receiving the elapsed time in seconds.
pub type EntryPoint = Arc<dyn Fn(f64) + Send + Sync>;

/// Ordered, duplicate-free list of entry points driven together.
pub struct Scheduler {
    name: String,
    entry_points: RwLock<Vec<EntryPoint>>,
}

impl Scheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry_points: RwLock::new(Vec::with_capacity(16)),
        }
    }

    /// Scheduler name (the native thread name it is bound to).
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends an entry point. Returns false for a duplicate.
    pub fn add(&self, entry_point: EntryPoint) -> bool {
        let mut entry_points = self.entry_points.write();
        if entry_points.iter().any(|e| Arc::ptr_eq(e, &entry_point)) {
            return false;
        }
        entry_points.push(entry_point);
        true
    }

    /// Removes an entry point. Returns false if absent.
    pub fn remove(&self, entry_point: &EntryPoint) -> bool {
        let mut entry_points = self.entry_points.write();
        let before = entry_points.len();
        entry_points.retain(|e| !Arc::ptr_eq(e, entry_point));
        entry_points.len() != before
    }

    /// Number of entry points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entry_points.read().len()
    }

    /// Returns true if there are no entry points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entry_points.read().is_empty()
    }

    /// Invokes every entry point with `delta_seconds`, isolating panics.
    ///
    /// Returns the number of entry points that failed.
    pub fn schedule(&self, delta_seconds: f64) -> usize {
        // Snapshot so an entry point may (un)register others.
        let entry_points: Vec<EntryPoint> = self.entry_points.read().clone();
        entry_points
            .iter()
            .filter(|entry_point| !run_isolated(&self.name, || entry_point(delta_seconds)))
            .count()
    }
}

impl AsyncCall for Scheduler {
    fn update(&self, delay: Duration) {
        self.schedule(delay.as_secs_f64());
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.name)
            .field("entry_points", &self.len())
            .finish()
    }
}

/// Native thread name used for a `(thread, cadence)` pair.
#[must_use]
pub fn scheduler_key(thread: &str, delay_ms: u64) -> String {
    if thread == MAIN_THREAD {
        MAIN_THREAD.to_string()
    } else {
        format!("{thread}@{}ms", delay_ms.max(1))
    }
}

/// Maps `(thread name, cadence)` pairs to schedulers on native threads.
pub struct SystemsDispatcher {
    registry: Arc<ThreadRegistry>,
    schedulers: Mutex<HashMap<String, Arc<Scheduler>>>,
    main: Arc<Scheduler>,
}

impl SystemsDispatcher {
    /// Creates a dispatcher registering its schedulers in `registry`.
    #[must_use]
    pub fn new(registry: Arc<ThreadRegistry>) -> Self {
        Self {
            registry,
            schedulers: Mutex::new(HashMap::new()),
            main: Arc::new(Scheduler::new(MAIN_THREAD)),
        }
    }

    /// Registry backing the native threads.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<ThreadRegistry> {
        &self.registry
    }

    /// Registers `entry_point` under `thread` at `delay_ms` (zero becomes
    /// one). The first entry point of a pair creates its scheduler and
    /// native thread.
    ///
    /// Returns false if the entry point was already registered there.
    ///
    /// # Errors
    ///
    /// A failure to create or start the native thread.
    pub fn register_entry_point(
        &self,
        thread: &str,
        entry_point: EntryPoint,
        delay_ms: u64,
    ) -> AsyncResult<bool> {
        if thread == MAIN_THREAD {
            return Ok(self.main.add(entry_point));
        }

        let key = scheduler_key(thread, delay_ms);
        let mut schedulers = self.schedulers.lock();
        if let Some(scheduler) = schedulers.get(&key) {
            return Ok(scheduler.add(entry_point));
        }

        let scheduler = Arc::new(Scheduler::new(key.clone()));
        scheduler.add(entry_point);
        let native = self
            .registry
            .get_or_create_thread(&key, Duration::from_millis(delay_ms.max(1)))?;
        native.add_participant(Arc::clone(&scheduler) as CallHandle);
        tracing::debug!(thread = %key, "scheduler created");
        schedulers.insert(key, scheduler);
        Ok(true)
    }

    /// Removes `entry_point` from the `(thread, delay_ms)` scheduler.
    /// Returns false if it was not registered there.
    pub fn remove_entry_point(&self, thread: &str, entry_point: &EntryPoint, delay_ms: u64) -> bool {
        if thread == MAIN_THREAD {
            return self.main.remove(entry_point);
        }
        let key = scheduler_key(thread, delay_ms);
        self.schedulers
            .lock()
            .get(&key)
            .is_some_and(|scheduler| scheduler.remove(entry_point))
    }

    /// Scheduler of a `(thread, delay_ms)` pair, if created.
    #[must_use]
    pub fn scheduler(&self, thread: &str, delay_ms: u64) -> Option<Arc<Scheduler>> {
        if thread == MAIN_THREAD {
            return Some(Arc::clone(&self.main));
        }
        self.schedulers.lock().get(&scheduler_key(thread, delay_ms)).cloned()
    }

    /// Drains the main delegate queue, then drives the main-thread
    /// scheduler once. Returns the number of failed entry points.
    pub fn tick_main(&self, delta_seconds: f64) -> usize {
        self.registry.drain_main();
        self.main.schedule(delta_seconds)
    }
}

impl std::fmt::Debug for SystemsDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemsDispatcher")
            .field("schedulers", &self.schedulers.lock().len())
            .field("main", &self.main.len())
            .finish()
    }
}
