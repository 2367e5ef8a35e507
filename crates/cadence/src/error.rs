//! # Runtime Error Types
//!
//! Top-level error wrapping every library error of the workspace.

use cadence_async::{AsyncError, TaskError};
use cadence_ecs::EcsError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while building or running a [`Runtime`](crate::Runtime).
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Thread or task failure.
    #[error(transparent)]
    Async(#[from] AsyncError),

    /// A task failed or was canceled.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Entity/component store failure.
    #[error(transparent)]
    Ecs(#[from] EcsError),

    /// A logging subscriber is already installed.
    #[error("logging already initialised: {0}")]
    Logging(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
