//! # Async Error Types
//!
//! Errors raised by thread lifecycle misuse and by cross-thread tasks.

use thiserror::Error;

/// Errors that can occur while managing native threads and the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AsyncError {
    /// `execute` was called on a thread (or registry) that is already running.
    #[error("thread '{0}' is already executed")]
    AlreadyRunning(String),

    /// `terminate` was called on a thread (or registry) that is not running.
    #[error("thread '{0}' is not executed")]
    NotRunning(String),

    /// A thread with this name is already registered.
    #[error("thread '{0}' is already registered")]
    DuplicateThread(String),

    /// The name belongs to the host thread and cannot back a native thread.
    #[error("thread name '{0}' is reserved for the host")]
    ReservedName(String),

    /// No thread with this name is registered.
    #[error("unknown thread '{0}'")]
    UnknownThread(String),

    /// The OS refused to spawn the thread.
    #[error("failed to spawn thread '{name}': {reason}")]
    Spawn {
        /// Thread name.
        name: String,
        /// OS error text.
        reason: String,
    },
}

/// Result type for thread operations.
pub type AsyncResult<T> = Result<T, AsyncError>;

/// Failure delivered by a task to every waiter.
///
/// Clonable so the same failure can be re-delivered to each caller that
/// polls or waits on an aborted task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task was started while a previous run was still pending.
    #[error("task is already started")]
    AlreadyStarted,

    /// The result was requested from a task that was never started.
    #[error("task was not started")]
    NotStarted,

    /// The task was aborted before the owning thread executed it.
    #[error("operation canceled")]
    Canceled,

    /// The computation panicked on the owning thread.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The result was requested from the owning thread while still pending.
    #[error("can't wait for a pending task on its own thread")]
    WouldDeadlock,
}

/// Result type for task operations.
pub type TaskResult<T> = Result<T, TaskError>;
