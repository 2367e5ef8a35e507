//! # ECS Error Types
//!
//! All errors that can occur in the entity/component store.

use cadence_async::AsyncError;
use thiserror::Error;

use crate::component::ComponentRef;
use crate::world::WorldId;

/// Errors that can occur in the entity/component store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// The component carries the null reference.
    #[error("component has the null reference")]
    NullComponent,

    /// The component is already attached to an entity.
    #[error("component {0} is already attached to an entity")]
    AlreadyAttached(ComponentRef),

    /// A singleton-tagged component of this type is already attached.
    #[error("entity already has a single component of type {0}")]
    SingletonViolation(&'static str),

    /// A dynamic list needs at least one component type.
    #[error("dynamic list requires at least one component type")]
    EmptyTypeMask,

    /// World ids must be non-negative.
    #[error("invalid world id {0}")]
    InvalidWorldId(WorldId),

    /// A world with this id already exists.
    #[error("world {0} already exists")]
    WorldIdTaken(WorldId),

    /// No world with this id exists.
    #[error("unknown world {0}")]
    UnknownWorld(WorldId),

    /// `close_write` was called on a component that is not write-locked.
    #[error("component {0} is not write-locked")]
    NotWriteLocked(ComponentRef),

    /// `write` was called by the token that already holds the lock.
    #[error("component {0} is already write-locked by this token")]
    WriteReentered(ComponentRef),

    /// A system of this type is already registered in the world.
    #[error("system {0} is already registered")]
    DuplicateSystem(&'static str),

    /// The system was removed from its world.
    #[error("system {0} is disposed")]
    SystemDisposed(&'static str),

    /// Failure reported by a system's own logic.
    #[error("system failure: {0}")]
    System(String),

    /// The systems dispatcher could not create or start a thread.
    #[error(transparent)]
    Async(#[from] AsyncError),
}

/// Result type for entity/component operations.
pub type EcsResult<T> = Result<T, EcsError>;
