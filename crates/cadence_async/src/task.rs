//! # Cross-Thread Tasks
//!
//! A [`Task`] wraps a zero-argument computation that must run on a designated
//! thread (the owner of a [`DelegateQueue`]) and delivers its result back to
//! any caller, on any thread.
//!
//! ## Lifecycle
//!
//! ```text
//!   Idle ──sync_start / async_start──> Running ──owner drains──> Completed(T)
//!                                         │                 └──> Failed(Panicked)
//!                                         └──abort()──────────> Failed(Canceled)
//! ```
//!
//! A finished task keeps its outcome: every later waiter or poller receives
//! the same value or the same failure.
//!
//! ## Pooling
//!
//! Tasks created through a [`TaskPool`] go back to the pool when the last
//! handle is dropped and nothing else (such as a still-queued delegate)
//! references them. A recycled task is fully reset before reuse: callbacks
//! cleared, state back to `Idle`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::delegate::{DelegateQueue, Priority};
use crate::error::{TaskError, TaskResult};
use crate::isolate::{panic_message, run_isolated};

/// Default number of idle tasks a pool keeps per result type.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

type Computation<T> = Box<dyn FnOnce() -> T + Send + 'static>;
type CompleteCallback<T> = Box<dyn FnOnce(&T) + Send + 'static>;
type AbortCallback = Box<dyn FnOnce(&TaskError) + Send + 'static>;

enum Status<T> {
    Idle,
    Running,
    Completed(T),
    Failed(TaskError),
}

struct TaskState<T> {
    status: Status<T>,
    computation: Option<Computation<T>>,
    /// `Some(true)` when started with `sync_start`.
    run_sync: Option<bool>,
    /// Queue the task was started on; its owner must not block on the result.
    target: Option<Arc<DelegateQueue>>,
    on_complete: Vec<CompleteCallback<T>>,
    on_abort: Vec<AbortCallback>,
}

impl<T> TaskState<T> {
    fn new(computation: Option<Computation<T>>) -> Self {
        Self {
            status: Status::Idle,
            computation,
            run_sync: None,
            target: None,
            on_complete: Vec::new(),
            on_abort: Vec::new(),
        }
    }
}

/// Shared storage behind every handle of one task.
struct TaskCell<T> {
    state: Mutex<TaskState<T>>,
    done: Condvar,
}

impl<T: Clone + Send + 'static> TaskCell<T> {
    fn new(computation: Computation<T>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TaskState::new(Some(computation))),
            done: Condvar::new(),
        })
    }

    /// Runs the computation on the calling thread. Called by the drained
    /// delegate on the owning thread, or inline.
    fn execute(&self) {
        let computation = {
            let mut state = self.state.lock();
            if !matches!(state.status, Status::Running) {
                // Aborted before the owner got to it.
                return;
            }
            state.computation.take()
        };
        let Some(computation) = computation else {
            return;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(computation));

        let mut state = self.state.lock();
        if !matches!(state.status, Status::Running) {
            return;
        }
        match outcome {
            Ok(value) => {
                state.status = Status::Completed(value.clone());
                let callbacks = std::mem::take(&mut state.on_complete);
                state.on_abort.clear();
                drop(state);
                self.done.notify_all();
                for callback in callbacks {
                    run_isolated("task on_complete", || callback(&value));
                }
            }
            Err(payload) => {
                let error = TaskError::Panicked(panic_message(payload.as_ref()));
                tracing::error!(error = %error, "task computation failed");
                state.status = Status::Failed(error.clone());
                let callbacks = std::mem::take(&mut state.on_abort);
                state.on_complete.clear();
                drop(state);
                self.done.notify_all();
                for callback in callbacks {
                    run_isolated("task on_abort", || callback(&error));
                }
            }
        }
    }

    fn reset(&self, computation: Computation<T>) {
        *self.state.lock() = TaskState::new(Some(computation));
    }
}

/// Handle to a cross-thread computation returning `T`.
///
/// Cloning the handle shares the same task; every clone observes the same
/// outcome.
pub struct Task<T: Send + 'static> {
    cell: Arc<TaskCell<T>>,
    pool: Weak<PoolInner<T>>,
}

impl<T: Clone + Send + 'static> Task<T> {
    /// Creates a standalone (unpooled) task.
    #[must_use]
    pub fn new<F>(computation: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self {
            cell: TaskCell::new(Box::new(computation)),
            pool: Weak::new(),
        }
    }

    /// Marks the task running and records how it was started.
    ///
    /// Returns the stored outcome instead if the task already finished.
    fn begin(&self, queue: &Arc<DelegateQueue>, run_sync: bool) -> Option<TaskResult<T>> {
        let mut state = self.cell.state.lock();
        match &state.status {
            Status::Running => Some(Err(TaskError::AlreadyStarted)),
            Status::Completed(value) => Some(Ok(value.clone())),
            Status::Failed(error) => Some(Err(error.clone())),
            Status::Idle => {
                state.status = Status::Running;
                state.run_sync = Some(run_sync);
                state.target = Some(Arc::clone(queue));
                None
            }
        }
    }

    fn dispatch(&self, queue: &DelegateQueue, priority: Priority) {
        let cell = Arc::clone(&self.cell);
        queue.enqueue(priority, Box::new(move || cell.execute()));
    }

    /// Runs the computation on `queue`'s owning thread and blocks until it
    /// finishes, returning its result or its failure.
    ///
    /// If the caller already is the owning thread the computation runs
    /// inline, since waiting would never end.
    ///
    /// # Errors
    ///
    /// [`TaskError::AlreadyStarted`] if a previous run is pending,
    /// [`TaskError::Canceled`] if aborted before it ran,
    /// [`TaskError::Panicked`] if the computation panicked.
    pub fn sync_start(&self, queue: &Arc<DelegateQueue>, priority: Priority) -> TaskResult<T> {
        if let Some(outcome) = self.begin(queue, true) {
            return outcome;
        }
        if queue.is_owner_thread() {
            self.cell.execute();
        } else {
            self.dispatch(queue, priority);
        }
        self.wait()
    }

    /// Enqueues the computation on `queue` and returns immediately.
    ///
    /// Retrieve the outcome with [`Task::async_end`] or [`Task::try_result`].
    /// Starting an already finished task is a no-op.
    ///
    /// # Errors
    ///
    /// [`TaskError::AlreadyStarted`] if a previous run is still pending.
    pub fn async_start(&self, queue: &Arc<DelegateQueue>, priority: Priority) -> TaskResult<&Self> {
        match self.begin(queue, false) {
            Some(Err(TaskError::AlreadyStarted)) => Err(TaskError::AlreadyStarted),
            Some(_) => Ok(self),
            None => {
                self.dispatch(queue, priority);
                Ok(self)
            }
        }
    }

    /// Blocks until the task finishes and returns its outcome.
    ///
    /// # Errors
    ///
    /// [`TaskError::WouldDeadlock`] when called from the owning thread while
    /// still pending, [`TaskError::NotStarted`] for a task never started,
    /// otherwise the stored failure.
    pub fn async_end(&self) -> TaskResult<T> {
        {
            let state = self.cell.state.lock();
            match &state.status {
                Status::Completed(value) => return Ok(value.clone()),
                Status::Failed(error) => return Err(error.clone()),
                Status::Idle => return Err(TaskError::NotStarted),
                Status::Running => {
                    if state.target.as_ref().is_some_and(|queue| queue.is_owner_thread()) {
                        return Err(TaskError::WouldDeadlock);
                    }
                }
            }
        }
        self.wait()
    }

    /// Alias of [`Task::async_end`].
    ///
    /// # Errors
    ///
    /// Same as [`Task::async_end`].
    pub fn result(&self) -> TaskResult<T> {
        self.async_end()
    }

    /// Non-blocking poll: `None` while pending or never started.
    #[must_use]
    pub fn try_result(&self) -> Option<TaskResult<T>> {
        let state = self.cell.state.lock();
        match &state.status {
            Status::Completed(value) => Some(Ok(value.clone())),
            Status::Failed(error) => Some(Err(error.clone())),
            Status::Idle | Status::Running => None,
        }
    }

    /// Waits up to `timeout` for the outcome. `None` if still pending.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskResult<T>> {
        let mut state = self.cell.state.lock();
        if matches!(state.status, Status::Running) {
            let _ = self.cell.done.wait_while_for(
                &mut state,
                |state| matches!(state.status, Status::Running),
                timeout,
            );
        }
        match &state.status {
            Status::Completed(value) => Some(Ok(value.clone())),
            Status::Failed(error) => Some(Err(error.clone())),
            Status::Idle | Status::Running => None,
        }
    }

    fn wait(&self) -> TaskResult<T> {
        let mut state = self.cell.state.lock();
        while matches!(state.status, Status::Running) {
            self.cell.done.wait(&mut state);
        }
        match &state.status {
            Status::Completed(value) => Ok(value.clone()),
            Status::Failed(error) => Err(error.clone()),
            Status::Idle | Status::Running => Err(TaskError::NotStarted),
        }
    }

    /// Runs the computation on the calling thread, bypassing any queue.
    ///
    /// # Errors
    ///
    /// Same as [`Task::sync_start`].
    pub fn run_inline(&self) -> TaskResult<T> {
        {
            let mut state = self.cell.state.lock();
            match &state.status {
                Status::Running => return Err(TaskError::AlreadyStarted),
                Status::Completed(value) => return Ok(value.clone()),
                Status::Failed(error) => return Err(error.clone()),
                Status::Idle => {
                    state.status = Status::Running;
                    state.run_sync = Some(true);
                }
            }
        }
        self.cell.execute();
        self.wait()
    }

    /// Registers a callback run once with the result on successful completion.
    ///
    /// Runs immediately on the calling thread if the task already completed.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let mut state = self.cell.state.lock();
        let value = match &state.status {
            Status::Completed(value) => value.clone(),
            Status::Failed(_) => return,
            Status::Idle | Status::Running => {
                state.on_complete.push(Box::new(callback));
                return;
            }
        };
        drop(state);
        run_isolated("task on_complete", || callback(&value));
    }

    /// Registers a callback run once with the failure if the task fails.
    ///
    /// Runs immediately on the calling thread if the task already failed.
    pub fn on_abort<F>(&self, callback: F)
    where
        F: FnOnce(&TaskError) + Send + 'static,
    {
        let mut state = self.cell.state.lock();
        let error = match &state.status {
            Status::Failed(error) => error.clone(),
            Status::Completed(_) => return,
            Status::Idle | Status::Running => {
                state.on_abort.push(Box::new(callback));
                return;
            }
        };
        drop(state);
        run_isolated("task on_abort", || callback(&error));
    }
}

impl<T: Send + 'static> Task<T> {
    /// Aborts a pending or idle task.
    ///
    /// Every current and future waiter receives [`TaskError::Canceled`].
    /// Has no effect on a task that already finished.
    pub fn abort(&self) {
        let callbacks = {
            let mut state = self.cell.state.lock();
            if matches!(state.status, Status::Completed(_) | Status::Failed(_)) {
                return;
            }
            state.status = Status::Failed(TaskError::Canceled);
            state.computation = None;
            state.on_complete.clear();
            std::mem::take(&mut state.on_abort)
        };
        tracing::warn!("task aborted");
        for callback in callbacks {
            run_isolated("task on_abort", || callback(&TaskError::Canceled));
        }
        self.cell.done.notify_all();
    }

    /// Returns true once the task finished (successfully or not).
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(
            self.cell.state.lock().status,
            Status::Completed(_) | Status::Failed(_)
        )
    }

    /// Returns true while the task waits for or runs on its owning thread.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.cell.state.lock().status, Status::Running)
    }

    /// Returns true if the task finished with a failure.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self.cell.state.lock().status, Status::Failed(_))
    }

    /// `Some(true)` if started synchronously, `None` if never started.
    #[must_use]
    pub fn completed_synchronously(&self) -> Option<bool> {
        self.cell.state.lock().run_sync
    }
}

impl<T: Send + 'static> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            pool: Weak::clone(&self.pool),
        }
    }
}

impl<T: Send + 'static> Drop for Task<T> {
    fn drop(&mut self) {
        // Only the last reference recycles; a queued delegate keeps its own.
        if Arc::strong_count(&self.cell) != 1 {
            return;
        }
        if let Some(pool) = self.pool.upgrade() {
            pool.recycle(Arc::clone(&self.cell));
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.cell.state.lock();
        let status = match state.status {
            Status::Idle => "idle",
            Status::Running => "running",
            Status::Completed(_) => "completed",
            Status::Failed(_) => "failed",
        };
        f.debug_struct("Task").field("status", &status).finish()
    }
}

// ============================================================================
// POOL
// ============================================================================

/// Allocation counters of one task pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks allocated fresh.
    pub created: u64,
    /// Tasks handed out from the free list.
    pub reused: u64,
    /// Tasks currently idle in the free list.
    pub idle: usize,
}

struct PoolInner<T> {
    free: Mutex<Vec<Arc<TaskCell<T>>>>,
    capacity: usize,
    created: AtomicU64,
    reused: AtomicU64,
}

impl<T: Send + 'static> PoolInner<T> {
    fn recycle(&self, cell: Arc<TaskCell<T>>) {
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(cell);
        }
    }
}

/// Free list of tasks producing `T`.
///
/// Cloning shares the same pool.
pub struct TaskPool<T: Send + 'static> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Clone + Send + 'static> TaskPool<T> {
    /// Creates a pool retaining at most `capacity` idle tasks.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::with_capacity(capacity)),
                capacity,
                created: AtomicU64::new(0),
                reused: AtomicU64::new(0),
            }),
        }
    }

    /// Returns a fresh or recycled idle task wrapping `computation`.
    pub fn schedule<F>(&self, computation: F) -> Task<T>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let recycled = self.inner.free.lock().pop();
        let cell = if let Some(cell) = recycled {
            cell.reset(Box::new(computation));
            self.inner.reused.fetch_add(1, Ordering::Relaxed);
            cell
        } else {
            self.inner.created.fetch_add(1, Ordering::Relaxed);
            TaskCell::new(Box::new(computation))
        };
        Task {
            cell,
            pool: Arc::downgrade(&self.inner),
        }
    }

    /// Returns the pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.inner.created.load(Ordering::Relaxed),
            reused: self.inner.reused.load(Ordering::Relaxed),
            idle: self.inner.free.lock().len(),
        }
    }

    /// Maximum idle tasks retained.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl<T: Send + 'static> Clone for TaskPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
