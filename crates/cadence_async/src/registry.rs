//! # Thread Registry
//!
//! Owns every [`NativeThread`] by name, along with the per-thread
//! [`DelegateQueue`] and [`TaskDispatcher`].
//!
//! The registry is an explicit object: construct it at startup, share it as
//! `Arc<ThreadRegistry>`, and call [`ThreadRegistry::shutdown`] (or drop it)
//! at teardown. Threads registered while the registry runs start at once.
//!
//! The reserved name [`MAIN_THREAD`] never gets a native thread. Its queue is
//! drained by whoever calls [`ThreadRegistry::drain_main`], normally the host
//! through [`SystemsDispatcher::tick_main`](crate::SystemsDispatcher::tick_main).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::call::CallHandle;
use crate::delegate::{DelegateQueue, DrainStats, DEFAULT_IMPORTANT_LIMIT};
use crate::dispatcher::TaskDispatcher;
use crate::error::{AsyncError, AsyncResult};
use crate::native_thread::{NativeThread, ThreadStats};
use crate::scheduler::MAIN_THREAD;
use crate::task::DEFAULT_POOL_CAPACITY;

/// Name reported in lifecycle errors about the registry itself.
const REGISTRY_NAME: &str = "registry";

/// Default silence after which a thread counts as not responding.
pub const DEFAULT_LIVENESS_THRESHOLD: Duration = Duration::from_secs(3);

/// Tunables applied to threads and queues the registry creates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Delay of lazily created threads.
    pub default_delay: Duration,
    /// Per-tick important drain cap of each delegate queue.
    pub important_limit: usize,
    /// Idle tasks retained per result type by each dispatcher.
    pub task_pool_capacity: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            default_delay: Duration::from_millis(crate::scheduler::DEFAULT_DELAY_MS),
            important_limit: DEFAULT_IMPORTANT_LIMIT,
            task_pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

/// Liveness snapshot of one thread.
#[derive(Clone, Debug)]
pub struct ThreadHealth {
    /// Thread name.
    pub name: String,
    /// Whether the loop is running.
    pub running: bool,
    /// Target delay.
    pub delay: Duration,
    /// Busy share of the last iteration, in percent.
    pub load_percent: f64,
    /// False if a running loop has been silent longer than the threshold.
    pub responding: bool,
    /// Raw loop timing.
    pub stats: ThreadStats,
}

/// Registry of named native threads.
pub struct ThreadRegistry {
    threads: RwLock<HashMap<String, Arc<NativeThread>>>,
    dispatchers: Mutex<HashMap<String, Arc<TaskDispatcher>>>,
    running: AtomicBool,
    options: RegistryOptions,
}

impl ThreadRegistry {
    /// Creates an empty, stopped registry with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(RegistryOptions::default())
    }

    /// Creates an empty, stopped registry.
    #[must_use]
    pub fn with_options(options: RegistryOptions) -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
            dispatchers: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            options,
        }
    }

    /// Options used for lazily created threads and queues.
    #[inline]
    #[must_use]
    pub const fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// Returns true between `execute_all` and `terminate_all`/`abort_all`.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Registers a new thread; starts it if the registry is running.
    ///
    /// # Errors
    ///
    /// [`AsyncError::ReservedName`] for [`MAIN_THREAD`],
    /// [`AsyncError::DuplicateThread`] if the name is taken, or a start
    /// failure.
    pub fn register_thread(&self, name: &str, delay: Duration) -> AsyncResult<Arc<NativeThread>> {
        if name == MAIN_THREAD {
            return Err(AsyncError::ReservedName(name.to_string()));
        }
        let mut threads = self.threads.write();
        if threads.contains_key(name) {
            return Err(AsyncError::DuplicateThread(name.to_string()));
        }
        let thread = Arc::new(NativeThread::new(name, delay));
        if self.is_running() {
            thread.execute()?;
        }
        threads.insert(name.to_string(), Arc::clone(&thread));
        tracing::debug!(thread = %name, ?delay, "thread registered");
        Ok(thread)
    }

    /// Looks up a thread by name.
    #[must_use]
    pub fn get_thread(&self, name: &str) -> Option<Arc<NativeThread>> {
        self.threads.read().get(name).cloned()
    }

    /// Returns the named thread, creating it with `delay` on first use.
    ///
    /// # Errors
    ///
    /// A start failure of the new thread.
    pub fn get_or_create_thread(&self, name: &str, delay: Duration) -> AsyncResult<Arc<NativeThread>> {
        if let Some(thread) = self.get_thread(name) {
            return Ok(thread);
        }
        match self.register_thread(name, delay) {
            Ok(thread) => {
                tracing::info!(thread = %name, "thread created on demand");
                Ok(thread)
            }
            // Lost a race with another creator.
            Err(AsyncError::DuplicateThread(_)) => self
                .get_thread(name)
                .ok_or_else(|| AsyncError::UnknownThread(name.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Unregisters a thread, stopping it if it runs.
    ///
    /// # Errors
    ///
    /// [`AsyncError::UnknownThread`] if no such thread exists.
    pub fn terminate_thread(&self, name: &str) -> AsyncResult<()> {
        let thread = self
            .threads
            .write()
            .remove(name)
            .ok_or_else(|| AsyncError::UnknownThread(name.to_string()))?;
        self.dispatchers.lock().remove(name);
        if thread.is_running() {
            thread.terminate()?;
        }
        Ok(())
    }

    /// Adds `call` to the named thread, creating and (if the registry runs)
    /// starting the thread on first use with the default delay.
    ///
    /// # Errors
    ///
    /// A start failure of the new thread.
    pub fn register_call(&self, name: &str, call: CallHandle) -> AsyncResult<Arc<NativeThread>> {
        let thread = self.get_or_create_thread(name, self.options.default_delay)?;
        thread.add_participant(call);
        Ok(thread)
    }

    /// Removes `call` from the named thread. Returns false if absent.
    pub fn remove_call(&self, name: &str, call: &CallHandle) -> bool {
        self.get_thread(name)
            .is_some_and(|thread| thread.remove_participant(call))
    }

    /// Task dispatcher (and delegate queue) of the named thread.
    ///
    /// The first call creates the queue and registers it as a participant,
    /// creating the thread if needed. The queue of [`MAIN_THREAD`] is not
    /// attached to any native thread; see [`ThreadRegistry::drain_main`].
    ///
    /// # Errors
    ///
    /// A start failure of the new thread.
    pub fn dispatcher(&self, name: &str) -> AsyncResult<Arc<TaskDispatcher>> {
        let mut dispatchers = self.dispatchers.lock();
        if let Some(dispatcher) = dispatchers.get(name) {
            return Ok(Arc::clone(dispatcher));
        }
        let queue = Arc::new(DelegateQueue::with_limit(name, self.options.important_limit));
        if name != MAIN_THREAD {
            self.register_call(name, Arc::clone(&queue) as CallHandle)?;
        }
        let dispatcher = Arc::new(TaskDispatcher::with_pool_capacity(
            queue,
            self.options.task_pool_capacity,
        ));
        dispatchers.insert(name.to_string(), Arc::clone(&dispatcher));
        Ok(dispatcher)
    }

    /// Delegate queue of the named thread. See [`ThreadRegistry::dispatcher`].
    ///
    /// # Errors
    ///
    /// A start failure of the new thread.
    pub fn delegate_queue(&self, name: &str) -> AsyncResult<Arc<DelegateQueue>> {
        Ok(Arc::clone(self.dispatcher(name)?.queue()))
    }

    /// Drains the [`MAIN_THREAD`] queue on the calling thread, which becomes
    /// its owner on the first call. `None` until a main dispatcher exists.
    pub fn drain_main(&self) -> Option<DrainStats> {
        let dispatcher = self.dispatchers.lock().get(MAIN_THREAD).cloned()?;
        Some(dispatcher.queue().drain())
    }

    /// Starts every registered thread that is not running.
    ///
    /// # Errors
    ///
    /// [`AsyncError::AlreadyRunning`] if the registry runs, or the first
    /// start failure.
    pub fn execute_all(&self) -> AsyncResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(AsyncError::AlreadyRunning(REGISTRY_NAME.to_string()));
        }
        for thread in self.threads.read().values() {
            if !thread.is_running() {
                thread.execute()?;
            }
        }
        tracing::info!(threads = self.len(), "thread registry started");
        Ok(())
    }

    /// Cooperatively stops every running thread and joins them.
    ///
    /// # Errors
    ///
    /// [`AsyncError::NotRunning`] if the registry is stopped.
    pub fn terminate_all(&self) -> AsyncResult<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(AsyncError::NotRunning(REGISTRY_NAME.to_string()));
        }
        for thread in self.snapshot() {
            if thread.is_running() {
                thread.terminate()?;
            }
        }
        tracing::info!("thread registry terminated");
        Ok(())
    }

    /// Aborts every running thread without joining.
    ///
    /// # Errors
    ///
    /// [`AsyncError::NotRunning`] if the registry is stopped.
    pub fn abort_all(&self) -> AsyncResult<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(AsyncError::NotRunning(REGISTRY_NAME.to_string()));
        }
        for thread in self.snapshot() {
            if thread.is_running() {
                thread.abort()?;
            }
        }
        Ok(())
    }

    /// Stops everything and forgets all threads and queues.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        let threads: Vec<_> = self.threads.write().drain().map(|(_, t)| t).collect();
        self.dispatchers.lock().clear();
        for thread in threads {
            if thread.is_running() {
                let _ = thread.terminate();
            }
        }
    }

    /// Registered thread names, sorted.
    #[must_use]
    pub fn thread_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.threads.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered threads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.threads.read().len()
    }

    /// Returns true if no thread is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.threads.read().is_empty()
    }

    /// Liveness of every thread, sorted by name.
    ///
    /// A running thread is not responding if its last iteration ended more
    /// than `threshold` ago, or if it never completed one within `threshold`
    /// of its creation.
    #[must_use]
    pub fn health_report(&self, threshold: Duration) -> Vec<ThreadHealth> {
        let mut report: Vec<_> = self
            .snapshot()
            .into_iter()
            .map(|thread| {
                let stats = thread.stats();
                let running = thread.is_running();
                let silence = stats.silence().unwrap_or_else(|| thread.current_time());
                ThreadHealth {
                    name: thread.name().to_string(),
                    running,
                    delay: thread.delay(),
                    load_percent: stats.load_percent(),
                    responding: !running || silence <= threshold,
                    stats,
                }
            })
            .collect();
        report.sort_by(|a, b| a.name.cmp(&b.name));
        report
    }

    fn snapshot(&self) -> Vec<Arc<NativeThread>> {
        self.threads.read().values().cloned().collect()
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ThreadRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadRegistry")
            .field("threads", &self.thread_names())
            .field("running", &self.is_running())
            .finish()
    }
}
