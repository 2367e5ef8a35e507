//! # Task Dispatcher
//!
//! Front door for marshaling computations onto one thread and getting their
//! results back. Wraps a [`DelegateQueue`] and keeps one [`TaskPool`] per
//! result type, created on first use.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::delegate::{DelegateQueue, Priority};
use crate::error::TaskResult;
use crate::task::{PoolStats, Task, TaskPool, DEFAULT_POOL_CAPACITY};

/// Schedules tasks on the thread owning `queue`.
pub struct TaskDispatcher {
    queue: Arc<DelegateQueue>,
    /// One `TaskPool<T>` per `TypeId::of::<T>()`.
    pools: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    pool_capacity: usize,
}

impl TaskDispatcher {
    /// Creates a dispatcher targeting `queue`.
    #[must_use]
    pub fn new(queue: Arc<DelegateQueue>) -> Self {
        Self::with_pool_capacity(queue, DEFAULT_POOL_CAPACITY)
    }

    /// Creates a dispatcher whose per-type pools retain at most
    /// `pool_capacity` idle tasks.
    #[must_use]
    pub fn with_pool_capacity(queue: Arc<DelegateQueue>, pool_capacity: usize) -> Self {
        Self {
            queue,
            pools: Mutex::new(HashMap::new()),
            pool_capacity,
        }
    }

    /// The queue tasks are dispatched to.
    #[inline]
    #[must_use]
    pub fn queue(&self) -> &Arc<DelegateQueue> {
        &self.queue
    }

    fn pool<T: Clone + Send + 'static>(&self) -> TaskPool<T> {
        let mut pools = self.pools.lock();
        let entry = pools
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(TaskPool::<T>::new(self.pool_capacity)));
        match entry.downcast_ref::<TaskPool<T>>() {
            Some(pool) => pool.clone(),
            None => {
                let pool = TaskPool::<T>::new(self.pool_capacity);
                *entry = Box::new(pool.clone());
                pool
            }
        }
    }

    /// Returns an idle task from the `T` pool, not yet started.
    pub fn schedule<T, F>(&self, computation: F) -> Task<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.pool::<T>().schedule(computation)
    }

    /// Runs `computation` on the owning thread and blocks for the result.
    ///
    /// # Errors
    ///
    /// The task failure ([`TaskError`](crate::TaskError)) if it panicked or
    /// was aborted.
    pub fn sync_run<T, F>(&self, computation: F, priority: Priority) -> TaskResult<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.schedule(computation).sync_start(&self.queue, priority)
    }

    /// [`TaskDispatcher::sync_run`] on the important tier.
    ///
    /// # Errors
    ///
    /// Same as [`TaskDispatcher::sync_run`].
    pub fn sync<T, F>(&self, computation: F) -> TaskResult<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.sync_run(computation, Priority::Important)
    }

    /// Enqueues `computation` and returns its running task.
    ///
    /// # Errors
    ///
    /// Only fails if the pooled task was unexpectedly still running.
    pub fn async_run<T, F>(&self, computation: F, priority: Priority) -> TaskResult<Task<T>>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let task = self.schedule(computation);
        task.async_start(&self.queue, priority)?;
        Ok(task)
    }

    /// Runs inline when called from the owning thread, otherwise enqueues on
    /// the important tier. The returned task is already finished in the
    /// inline case.
    ///
    /// # Errors
    ///
    /// Same as [`TaskDispatcher::async_run`].
    pub fn run<T, F>(&self, computation: F) -> TaskResult<Task<T>>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.queue.is_owner_thread() {
            let task = self.schedule(computation);
            // Outcome is stored on the task for the caller.
            let _ = task.run_inline();
            Ok(task)
        } else {
            self.async_run(computation, Priority::Important)
        }
    }

    /// Counters of the `T` pool.
    #[must_use]
    pub fn pool_stats<T: Clone + Send + 'static>(&self) -> PoolStats {
        self.pool::<T>().stats()
    }
}

impl std::fmt::Debug for TaskDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDispatcher")
            .field("queue", &self.queue.name())
            .field("pools", &self.pools.lock().len())
            .field("pool_capacity", &self.pool_capacity)
            .finish()
    }
}
