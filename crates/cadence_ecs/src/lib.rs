//! # Cadence ECS
//!
//! Concurrent entity/component store whose systems run on named,
//! fixed-cadence threads.
//!
//! ## Architecture
//!
//! ```text
//! WorldRegistry
//!  └─ World (id, enabled)
//!      ├─ EntityManager ── on_transfer / on_remove ──┬─> EntityDynamicList ─> Handler per entity
//!      │    └─ Entity ── on_component_added/removed ─┘
//!      │         └─ Component<T>  (exclusive write, shared read)
//!      └─ SystemManager
//!           └─ System ── entry point ──> SystemsDispatcher ──> NativeThread
//! ```
//!
//! ## Component access
//!
//! A writer calls [`Component::open_write`] with its [`OwnerToken`] and
//! later [`Component::close_write`]. Readers with another token block until
//! the write closes and never observe a partial value; the writer itself
//! reads its own in-progress state.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cadence_async::{SystemsDispatcher, ThreadRegistry};
//! use cadence_ecs::{Component, ComponentData, ComponentHandle, OwnerToken, WorldRegistry};
//!
//! #[derive(Clone, Default)]
//! struct Health(u32);
//!
//! impl ComponentData for Health {}
//!
//! let threads = Arc::new(ThreadRegistry::new());
//! let worlds = WorldRegistry::new(Arc::new(SystemsDispatcher::new(threads)));
//!
//! let health = Component::new(Health(10));
//! let entity = worlds
//!     .main_world()
//!     .create_entity([Arc::clone(&health) as ComponentHandle])?;
//!
//! let token = OwnerToken::new();
//! health.write(token, |h| h.0 -= 3)?;
//! assert_eq!(health.read_shared().0, 7);
//! assert!(entity.has_component::<Health>());
//! # Ok::<(), cadence_ecs::EcsError>(())
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod dynamic_list;
pub mod entity;
pub mod error;
pub mod manager;
pub mod observer;
pub mod system;
pub mod world;

pub use component::{
    downcast, same_component, AnyComponent, Component, ComponentData, ComponentHandle,
    ComponentRef, ComponentTags, ComponentType, OwnerToken,
};
pub use dynamic_list::{EntityDynamicList, Handler};
pub use entity::{Entity, EntityId, EntityKind};
pub use error::{EcsError, EcsResult};
pub use manager::EntityManager;
pub use observer::{Observers, SubscriptionId};
pub use system::{System, SystemContext, SystemManager, SystemRef, SystemState};
pub use world::{World, WorldId, WorldRegistry};
