//! # Worlds
//!
//! A [`World`] owns one [`EntityManager`] and one [`SystemManager`] and
//! broadcasts its enabled state to the systems registered in it.
//!
//! The [`WorldRegistry`] is an explicit object created at startup with the
//! [`SystemsDispatcher`] its systems are scheduled on:
//!
//! ```text
//!   WorldRegistry ─┬─ World 0 (main) ─┬─ EntityManager
//!                  │                  └─ SystemManager ──> SystemsDispatcher
//!                  └─ World 1 ...
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use cadence_async::SystemsDispatcher;
use parking_lot::RwLock;

use crate::component::ComponentHandle;
use crate::entity::Entity;
use crate::error::{EcsError, EcsResult};
use crate::manager::EntityManager;
use crate::observer::{Observers, SubscriptionId};
use crate::system::SystemManager;

/// Integer world identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct WorldId(i32);

impl WorldId {
    /// "No world".
    pub const INVALID: Self = Self(-1);

    /// The main world, created on demand by the registry.
    pub const MAIN: Self = Self(0);

    /// Creates a world id.
    #[inline]
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }

    /// Returns true for non-negative ids.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// WORLD
// ============================================================================

/// A container of one entity manager and one system manager.
pub struct World {
    id: WorldId,
    /// Shared with every system cell of this world.
    enabled: Arc<AtomicBool>,
    entities: Arc<EntityManager>,
    systems: SystemManager,
    on_enabled: Observers<bool>,
}

impl World {
    fn new(id: WorldId, registry: Weak<RegistryInner>, dispatcher: Arc<SystemsDispatcher>) -> Self {
        let enabled = Arc::new(AtomicBool::new(true));
        let entities = Arc::new(EntityManager::with_registry(id, registry));
        let systems = SystemManager::new(id, Arc::clone(&entities), dispatcher, Arc::clone(&enabled));
        Self {
            id,
            enabled,
            entities,
            systems,
            on_enabled: Observers::new(),
        }
    }

    /// World identity.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> WorldId {
        self.id
    }

    /// Entity manager of this world.
    #[inline]
    #[must_use]
    pub fn entities(&self) -> &Arc<EntityManager> {
        &self.entities
    }

    /// System manager of this world.
    #[inline]
    #[must_use]
    pub const fn systems(&self) -> &SystemManager {
        &self.systems
    }

    /// Returns true if systems of this world update.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Enables or disables every system of this world and notifies
    /// observers when the state changes.
    pub fn set_enabled(&self, enabled: bool) {
        if self.enabled.swap(enabled, Ordering::AcqRel) == enabled {
            return;
        }
        tracing::info!(world = %self.id, enabled, "world state changed");
        self.on_enabled.notify(&enabled);
    }

    /// Subscribes to enable/disable changes.
    pub fn on_enabled_changed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.on_enabled.subscribe(callback)
    }

    /// Cancels an `on_enabled_changed` subscription.
    pub fn unsubscribe_enabled(&self, id: SubscriptionId) -> bool {
        self.on_enabled.unsubscribe(id)
    }

    /// Creates an entity in this world.
    ///
    /// # Errors
    ///
    /// The first component attach failure.
    pub fn create_entity<I>(&self, components: I) -> EcsResult<Entity>
    where
        I: IntoIterator<Item = ComponentHandle>,
    {
        self.entities.create_entity(components)
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("id", &self.id)
            .field("enabled", &self.is_enabled())
            .field("entities", &self.entities.len())
            .field("systems", &self.systems.len())
            .finish()
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

pub(crate) struct RegistryInner {
    worlds: RwLock<HashMap<WorldId, Arc<World>>>,
    dispatcher: Arc<SystemsDispatcher>,
}

impl RegistryInner {
    pub(crate) fn world(&self, id: WorldId) -> Option<Arc<World>> {
        self.worlds.read().get(&id).cloned()
    }
}

/// Registry of worlds by id.
pub struct WorldRegistry {
    inner: Arc<RegistryInner>,
}

impl WorldRegistry {
    /// Creates an empty registry scheduling systems on `dispatcher`.
    #[must_use]
    pub fn new(dispatcher: Arc<SystemsDispatcher>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                worlds: RwLock::new(HashMap::new()),
                dispatcher,
            }),
        }
    }

    /// Dispatcher systems are scheduled on.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<SystemsDispatcher> {
        &self.inner.dispatcher
    }

    /// Creates and registers a world.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidWorldId`] for negative ids,
    /// [`EcsError::WorldIdTaken`] if the id exists.
    pub fn create_world(&self, id: WorldId) -> EcsResult<Arc<World>> {
        if !id.is_valid() {
            return Err(EcsError::InvalidWorldId(id));
        }
        let mut worlds = self.inner.worlds.write();
        if worlds.contains_key(&id) {
            return Err(EcsError::WorldIdTaken(id));
        }
        let world = self.build_world(id);
        worlds.insert(id, Arc::clone(&world));
        Ok(world)
    }

    fn build_world(&self, id: WorldId) -> Arc<World> {
        tracing::info!(world = %id, "world created");
        Arc::new(World::new(
            id,
            Arc::downgrade(&self.inner),
            Arc::clone(&self.inner.dispatcher),
        ))
    }

    /// Looks up a world.
    #[must_use]
    pub fn try_get_world(&self, id: WorldId) -> Option<Arc<World>> {
        self.inner.world(id)
    }

    /// Looks up a world.
    ///
    /// # Errors
    ///
    /// [`EcsError::UnknownWorld`] if absent.
    pub fn get_world(&self, id: WorldId) -> EcsResult<Arc<World>> {
        self.inner.world(id).ok_or(EcsError::UnknownWorld(id))
    }

    /// The main world (id 0), created on first use.
    #[must_use]
    pub fn main_world(&self) -> Arc<World> {
        if let Some(world) = self.inner.world(WorldId::MAIN) {
            return world;
        }
        let mut worlds = self.inner.worlds.write();
        let world = worlds
            .entry(WorldId::MAIN)
            .or_insert_with(|| self.build_world(WorldId::MAIN));
        Arc::clone(world)
    }

    /// Creates an entity in world `id`.
    ///
    /// # Errors
    ///
    /// [`EcsError::UnknownWorld`] or the first attach failure.
    pub fn create_entity<I>(&self, id: WorldId, components: I) -> EcsResult<Entity>
    where
        I: IntoIterator<Item = ComponentHandle>,
    {
        self.get_world(id)?.create_entity(components)
    }

    /// Unregisters a world, disposing its systems and removing its entities.
    ///
    /// # Errors
    ///
    /// [`EcsError::UnknownWorld`] if absent.
    pub fn remove_world(&self, id: WorldId) -> EcsResult<Arc<World>> {
        let world = self
            .inner
            .worlds
            .write()
            .remove(&id)
            .ok_or(EcsError::UnknownWorld(id))?;
        world.systems().clear();
        for entity in world.entities().entities() {
            world.entities().remove_entity(&entity);
        }
        tracing::info!(world = %id, "world removed");
        Ok(world)
    }

    /// Registered world ids, sorted.
    #[must_use]
    pub fn world_ids(&self) -> Vec<WorldId> {
        let mut ids: Vec<_> = self.inner.worlds.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Removes every world.
    pub fn shutdown(&self) {
        for id in self.world_ids() {
            let _ = self.remove_world(id);
        }
    }
}

impl Drop for WorldRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for WorldRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldRegistry")
            .field("worlds", &self.world_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, ComponentData};
    use cadence_async::ThreadRegistry;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Default)]
    struct Marker;

    impl ComponentData for Marker {}

    fn registry() -> WorldRegistry {
        let threads = Arc::new(ThreadRegistry::new());
        WorldRegistry::new(Arc::new(SystemsDispatcher::new(threads)))
    }

    #[test]
    fn test_create_world_errors() {
        let worlds = registry();
        worlds.create_world(WorldId::new(1)).unwrap();
        assert_eq!(
            worlds.create_world(WorldId::new(1)).err(),
            Some(EcsError::WorldIdTaken(WorldId::new(1)))
        );
        assert_eq!(
            worlds.create_world(WorldId::INVALID).err(),
            Some(EcsError::InvalidWorldId(WorldId::INVALID))
        );
        assert_eq!(
            worlds.get_world(WorldId::new(9)).err(),
            Some(EcsError::UnknownWorld(WorldId::new(9)))
        );
    }

    #[test]
    fn test_main_world_created_on_demand() {
        let worlds = registry();
        assert!(worlds.try_get_world(WorldId::MAIN).is_none());
        let main = worlds.main_world();
        assert_eq!(main.id(), WorldId::MAIN);
        assert!(Arc::ptr_eq(&main, &worlds.main_world()));
    }

    #[test]
    fn test_transfer_between_worlds() {
        let worlds = registry();
        let a = worlds.create_world(WorldId::new(1)).unwrap();
        let b = worlds.create_world(WorldId::new(2)).unwrap();

        let removed_from_a = Arc::new(AtomicUsize::new(0));
        {
            let removed_from_a = Arc::clone(&removed_from_a);
            a.entities().on_remove(move |_| {
                removed_from_a.fetch_add(1, Ordering::SeqCst);
            });
        }

        let entity = worlds
            .create_entity(WorldId::new(1), [Component::new(Marker) as ComponentHandle])
            .unwrap();
        assert_eq!(entity.world_id(), WorldId::new(1));

        b.entities().transfer_in(&entity);
        assert_eq!(entity.world_id(), WorldId::new(2));
        assert!(!a.entities().contains(entity.id()));
        assert!(b.entities().contains(entity.id()));
        assert_eq!(removed_from_a.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_transfers_keep_single_membership() {
        let worlds = registry();
        let a = worlds.create_world(WorldId::new(1)).unwrap();
        let b = worlds.create_world(WorldId::new(2)).unwrap();

        for _ in 0..200 {
            let entity = Entity::new();
            let barrier = Arc::new(std::sync::Barrier::new(2));
            let movers: Vec<_> = [&a, &b]
                .into_iter()
                .map(|world| {
                    let manager = Arc::clone(world.entities());
                    let entity = entity.clone();
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        manager.transfer_in(&entity);
                    })
                })
                .collect();
            for mover in movers {
                mover.join().unwrap();
            }

            let in_a = a.entities().contains(entity.id());
            let in_b = b.entities().contains(entity.id());
            assert!(in_a != in_b, "entity registered in both or neither world");
            let expected = if in_a { a.id() } else { b.id() };
            assert_eq!(entity.world_id(), expected);
        }
    }

    #[test]
    fn test_enabled_broadcast() {
        let worlds = registry();
        let world = worlds.main_world();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            world.on_enabled_changed(move |enabled| seen.lock().push(*enabled));
        }

        world.set_enabled(false);
        world.set_enabled(false);
        world.set_enabled(true);
        assert_eq!(*seen.lock(), vec![false, true]);
    }

    #[test]
    fn test_remove_world_clears_membership() {
        let worlds = registry();
        let world = worlds.create_world(WorldId::new(4)).unwrap();
        let entity = world.create_entity(Vec::new()).unwrap();

        worlds.remove_world(WorldId::new(4)).unwrap();
        assert!(!entity.in_world());
        assert!(world.entities().is_empty());
        assert_eq!(worlds.world_ids(), Vec::<WorldId>::new());
    }
}
