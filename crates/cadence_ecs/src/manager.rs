//! # Entity Manager
//!
//! Per-world membership of entities.
//!
//! ## Transfer
//!
//! ```text
//!   transfer_in(e)
//!     ├─ lock e's transfer mutex
//!     │    ├─ already here?            ──> no-op
//!     │    ├─ e in another live world? ──> detach it there
//!     │    └─ insert here, stamp e.world_id
//!     ├─ unlock
//!     └─ on_remove(e) in the prior world, then on_transfer(e) here
//! ```
//!
//! An entity is registered in at most one world's manager at a time.
//! Observers run with no lock held.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::component::{Component, ComponentData, ComponentHandle, ComponentRef, ComponentType};
use crate::dynamic_list::EntityDynamicList;
use crate::entity::{Entity, EntityId};
use crate::error::EcsResult;
use crate::observer::{Observers, SubscriptionId};
use crate::world::{RegistryInner, WorldId};

/// Entities of one world.
pub struct EntityManager {
    world_id: WorldId,
    entities: Mutex<HashMap<EntityId, Entity>>,
    on_transfer: Observers<Entity>,
    on_remove: Observers<Entity>,
    /// Used to find the prior world of a transferred entity.
    registry: Weak<RegistryInner>,
}

impl EntityManager {
    /// Creates a manager not attached to any registry.
    ///
    /// Transfers into it do not remove entities from their prior world.
    #[must_use]
    pub fn new(world_id: WorldId) -> Self {
        Self::with_registry(world_id, Weak::new())
    }

    pub(crate) fn with_registry(world_id: WorldId, registry: Weak<RegistryInner>) -> Self {
        Self {
            world_id,
            entities: Mutex::new(HashMap::new()),
            on_transfer: Observers::new(),
            on_remove: Observers::new(),
            registry,
        }
    }

    /// World this manager belongs to.
    #[inline]
    #[must_use]
    pub const fn world_id(&self) -> WorldId {
        self.world_id
    }

    /// Moves `entity` into this world, removing it from its prior world.
    pub fn transfer_in(&self, entity: &Entity) {
        let prior = {
            let _transfer = entity.lock_transfer();
            if self.contains(entity.id()) {
                return;
            }

            let prior_world = entity.world_id();
            let prior = if prior_world.is_valid() && prior_world != self.world_id {
                self.registry
                    .upgrade()
                    .and_then(|r| r.world(prior_world))
                    .map(|world| Arc::clone(world.entities()))
                    .and_then(|manager| manager.detach(entity).map(|removed| (manager, removed)))
            } else {
                None
            };

            let mut entities = self.entities.lock();
            if entities.contains_key(&entity.id()) {
                return;
            }
            entities.insert(entity.id(), entity.clone());
            entity.set_world_id(self.world_id);
            prior
        };

        if let Some((manager, removed)) = prior {
            manager.notify_removed(&removed);
        }
        tracing::trace!(world = %self.world_id, entity = %entity, "entity transferred in");
        self.on_transfer.notify(entity);
    }

    /// Creates an entity with `components` and transfers it in.
    ///
    /// # Errors
    ///
    /// The first component attach failure.
    pub fn create_entity<I>(&self, components: I) -> EcsResult<Entity>
    where
        I: IntoIterator<Item = ComponentHandle>,
    {
        let entity = Entity::with_components(components)?;
        self.transfer_in(&entity);
        Ok(entity)
    }

    /// Removes `entity`. Returns false if it was not registered here.
    pub fn remove_entity(&self, entity: &Entity) -> bool {
        let Some(removed) = self.detach(entity) else {
            return false;
        };
        self.notify_removed(&removed);
        true
    }

    /// Drops `entity` from the membership and clears its stamp, without
    /// notifying.
    fn detach(&self, entity: &Entity) -> Option<Entity> {
        let removed = self.entities.lock().remove(&entity.id())?;
        removed.leave_world(self.world_id);
        Some(removed)
    }

    fn notify_removed(&self, removed: &Entity) {
        tracing::trace!(world = %self.world_id, entity = %removed, "entity removed");
        self.on_remove.notify(removed);
    }

    /// Returns true if an entity with `id` is registered.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.lock().contains_key(&id)
    }

    /// Looks up an entity.
    #[must_use]
    pub fn get_entity(&self, id: EntityId) -> Option<Entity> {
        self.entities.lock().get(&id).cloned()
    }

    /// Number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.lock().len()
    }

    /// Returns true if the world holds no entity.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.lock().is_empty()
    }

    /// Snapshot of the membership, taken under the mutex.
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        self.entities.lock().values().cloned().collect()
    }

    /// Appends the membership to `out`, clearing it first if `clear` is set.
    pub fn fill_list(&self, out: &mut Vec<Entity>, clear: bool) {
        if clear {
            out.clear();
        }
        out.extend(self.entities.lock().values().cloned());
    }

    /// Every component of type `T` across all entities.
    #[must_use]
    pub fn components_list<T: ComponentData>(&self) -> Vec<Arc<Component<T>>> {
        let mut out = Vec::new();
        for entity in self.entities() {
            entity.components_of::<T>(&mut out, false);
        }
        out
    }

    /// Entity owning the component with `reference`.
    #[must_use]
    pub fn find_entity_from_component(&self, reference: ComponentRef) -> Option<Entity> {
        self.entities()
            .into_iter()
            .find(|entity| entity.component_by_ref(reference).is_some())
    }

    /// Builds a dynamic list over this manager.
    ///
    /// # Errors
    ///
    /// [`EcsError::EmptyTypeMask`](crate::EcsError::EmptyTypeMask) if `types`
    /// is empty.
    pub fn dynamic_list(self: &Arc<Self>, types: &[ComponentType]) -> EcsResult<EntityDynamicList> {
        EntityDynamicList::new(self, types)
    }

    // ========================================================================
    // NOTIFICATIONS
    // ========================================================================

    /// Subscribes to entities entering this world.
    pub fn on_transfer<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Entity) + Send + Sync + 'static,
    {
        self.on_transfer.subscribe(callback)
    }

    /// Subscribes to entities leaving this world.
    pub fn on_remove<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Entity) + Send + Sync + 'static,
    {
        self.on_remove.subscribe(callback)
    }

    /// Cancels an `on_transfer` subscription.
    pub fn unsubscribe_transfer(&self, id: SubscriptionId) -> bool {
        self.on_transfer.unsubscribe(id)
    }

    /// Cancels an `on_remove` subscription.
    pub fn unsubscribe_remove(&self, id: SubscriptionId) -> bool {
        self.on_remove.unsubscribe(id)
    }

    /// Number of live subscriptions (transfer + remove).
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.on_transfer.len() + self.on_remove.len()
    }
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("world", &self.world_id)
            .field("entities", &self.len())
            .finish()
    }
}
