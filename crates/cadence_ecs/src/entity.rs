//! # Entities
//!
//! An [`Entity`] is a stable 128-bit identity plus an unordered set of
//! components.
//!
//! ## Instances
//!
//! ```text
//!   Entity (Original) ───┐
//!                        ├──> EntityInner { components, membership, observers }
//!   Entity (CopyRef) ────┘
//! ```
//!
//! A copy-reference shares the component mapping and the notification lists
//! of the entity it was copied from. It is an alias, not a deep copy.
//!
//! ## Singleton Rule
//!
//! A component tagged [`ComponentTags::SINGLE_TYPE`] is also indexed by its
//! concrete type; attaching a second one of that type fails.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use uuid::Uuid;

use crate::component::{
    downcast, Component, ComponentData, ComponentHandle, ComponentRef, ComponentTags, ComponentType,
};
use crate::error::{EcsError, EcsResult};
use crate::observer::{Observers, SubscriptionId};
use crate::world::WorldId;

/// 128-bit globally unique entity identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Creates a random (v4) identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    /// 32 lowercase hex digits, no dashes.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Kind of an entity handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    /// Created by the factory; owns its component mapping.
    Original,
    /// Alias of another entity's component mapping.
    CopyReference,
}

#[derive(Default)]
struct Components {
    by_ref: HashMap<ComponentRef, ComponentHandle>,
    singles: HashMap<TypeId, ComponentHandle>,
}

struct Membership {
    world: WorldId,
    enabled: bool,
}

struct EntityInner {
    id: EntityId,
    components: RwLock<Components>,
    membership: Mutex<Membership>,
    /// Held for a whole world-to-world move.
    transfer: Mutex<()>,
    on_add: Observers<ComponentHandle>,
    on_remove: Observers<ComponentHandle>,
}

/// Handle of an entity. Cloning yields another handle of the same kind.
#[derive(Clone)]
pub struct Entity {
    inner: Arc<EntityInner>,
    kind: EntityKind,
}

impl Entity {
    /// Creates an original entity in no world, enabled, without components.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EntityInner {
                id: EntityId::new(),
                components: RwLock::new(Components::default()),
                membership: Mutex::new(Membership {
                    world: WorldId::INVALID,
                    enabled: true,
                }),
                transfer: Mutex::new(()),
                on_add: Observers::new(),
                on_remove: Observers::new(),
            }),
            kind: EntityKind::Original,
        }
    }

    /// Creates an original entity and attaches `components` in order.
    ///
    /// # Errors
    ///
    /// The first attach failure; components attached before it stay on the
    /// returned-then-dropped entity and are detached with it.
    pub fn with_components<I>(components: I) -> EcsResult<Self>
    where
        I: IntoIterator<Item = ComponentHandle>,
    {
        let entity = Self::new();
        for component in components {
            if let Err(e) = entity.add_component(component) {
                entity.clear_components();
                return Err(e);
            }
        }
        Ok(entity)
    }

    /// Returns a copy-reference aliasing this entity.
    #[must_use]
    pub fn copy_reference(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            kind: EntityKind::CopyReference,
        }
    }

    /// Stable identity, shared by every copy-reference.
    #[inline]
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.inner.id
    }

    /// Kind of this handle.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Returns true for the original handle.
    #[inline]
    #[must_use]
    pub fn is_original(&self) -> bool {
        self.kind == EntityKind::Original
    }

    /// World the entity belongs to, or [`WorldId::INVALID`].
    #[must_use]
    pub fn world_id(&self) -> WorldId {
        self.inner.membership.lock().world
    }

    /// Returns true if the entity belongs to a world.
    #[must_use]
    pub fn in_world(&self) -> bool {
        self.world_id().is_valid()
    }

    /// Serializes transfers of this entity between managers.
    pub(crate) fn lock_transfer(&self) -> MutexGuard<'_, ()> {
        self.inner.transfer.lock()
    }

    pub(crate) fn set_world_id(&self, world: WorldId) {
        self.inner.membership.lock().world = world;
    }

    /// Clears the world stamp if it still equals `world`.
    pub(crate) fn leave_world(&self, world: WorldId) {
        let mut membership = self.inner.membership.lock();
        if membership.world == world {
            membership.world = WorldId::INVALID;
        }
    }

    /// Returns the enabled flag (shared by copy-references).
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.membership.lock().enabled
    }

    /// Sets the enabled flag.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.membership.lock().enabled = enabled;
    }

    // ========================================================================
    // COMPONENT OPERATIONS
    // ========================================================================

    /// Attaches a component and notifies add observers.
    ///
    /// # Errors
    ///
    /// - [`EcsError::NullComponent`] for the null reference;
    /// - [`EcsError::AlreadyAttached`] if attached to any entity;
    /// - [`EcsError::SingletonViolation`] if the component is singleton-tagged
    ///   and one of its type is already attached here.
    pub fn add_component(&self, component: ComponentHandle) -> EcsResult<()> {
        let reference = component.reference();
        if reference.is_null() {
            return Err(EcsError::NullComponent);
        }
        if component.is_attached() {
            return Err(EcsError::AlreadyAttached(reference));
        }

        {
            let mut components = self.inner.components.write();
            let single = component.tags().contains(ComponentTags::SINGLE_TYPE);
            let ty = component.component_type();
            if single && components.singles.contains_key(&ty.id()) {
                return Err(EcsError::SingletonViolation(ty.name()));
            }
            if !component.try_attach() {
                return Err(EcsError::AlreadyAttached(reference));
            }
            if single {
                components.singles.insert(ty.id(), Arc::clone(&component));
            }
            components.by_ref.insert(reference, Arc::clone(&component));
        }

        self.inner.on_add.notify(&component);
        Ok(())
    }

    /// Creates a component from `data` and attaches it.
    ///
    /// # Errors
    ///
    /// Same as [`Entity::add_component`].
    pub fn add<T: ComponentData>(&self, data: T) -> EcsResult<Arc<Component<T>>> {
        let component = Component::new(data);
        self.add_component(component.clone())?;
        Ok(component)
    }

    /// Detaches a component. Observers are notified only if it was attached
    /// to this entity.
    pub fn remove_component(&self, component: &ComponentHandle) -> bool {
        self.remove_by_ref(component.reference()).is_some()
    }

    /// Detaches the component with `reference`, returning it.
    pub fn remove_by_ref(&self, reference: ComponentRef) -> Option<ComponentHandle> {
        let removed = {
            let mut components = self.inner.components.write();
            let removed = components.by_ref.remove(&reference)?;
            let ty = removed.component_type().id();
            if components
                .singles
                .get(&ty)
                .is_some_and(|single| single.reference() == reference)
            {
                components.singles.remove(&ty);
            }
            removed
        };
        removed.detach();
        self.inner.on_remove.notify(&removed);
        Some(removed)
    }

    /// Detaches every component, notifying for each.
    pub fn clear_components(&self) {
        let refs: Vec<ComponentRef> = self.inner.components.read().by_ref.keys().copied().collect();
        for reference in refs {
            self.remove_by_ref(reference);
        }
    }

    /// Some attached component of type `T` (linear lookup).
    #[must_use]
    pub fn get_component<T: ComponentData>(&self) -> Option<Arc<Component<T>>> {
        let ty = TypeId::of::<T>();
        let components = self.inner.components.read();
        components
            .by_ref
            .values()
            .find(|c| c.component_type().id() == ty)
            .and_then(downcast::<T>)
    }

    /// The singleton-tagged component of type `T` (keyed lookup).
    #[must_use]
    pub fn get_single_component<T: ComponentData>(&self) -> Option<Arc<Component<T>>> {
        self.inner
            .components
            .read()
            .singles
            .get(&TypeId::of::<T>())
            .and_then(downcast::<T>)
    }

    /// Attached component with `reference`.
    #[must_use]
    pub fn component_by_ref(&self, reference: ComponentRef) -> Option<ComponentHandle> {
        self.inner.components.read().by_ref.get(&reference).cloned()
    }

    /// Returns true if a component of type `T` is attached.
    #[must_use]
    pub fn has_component<T: ComponentData>(&self) -> bool {
        self.has_type(ComponentType::of::<T>())
    }

    /// Returns true if a component of type `ty` is attached.
    #[must_use]
    pub fn has_type(&self, ty: ComponentType) -> bool {
        self.inner
            .components
            .read()
            .by_ref
            .values()
            .any(|c| c.component_type() == ty)
    }

    /// Appends every attached component to `out`, clearing it first if
    /// `clear` is set. Order is unspecified.
    pub fn get_components(&self, out: &mut Vec<ComponentHandle>, clear: bool) {
        if clear {
            out.clear();
        }
        out.extend(self.inner.components.read().by_ref.values().cloned());
    }

    /// Appends every attached component of type `T` to `out`.
    pub fn components_of<T: ComponentData>(&self, out: &mut Vec<Arc<Component<T>>>, clear: bool) {
        if clear {
            out.clear();
        }
        let ty = TypeId::of::<T>();
        let components = self.inner.components.read();
        out.extend(
            components
                .by_ref
                .values()
                .filter(|c| c.component_type().id() == ty)
                .filter_map(downcast::<T>),
        );
    }

    /// Appends every attached component of type `ty` to `out`.
    pub fn components_of_type(&self, ty: ComponentType, out: &mut Vec<ComponentHandle>, clear: bool) {
        if clear {
            out.clear();
        }
        let components = self.inner.components.read();
        out.extend(
            components
                .by_ref
                .values()
                .filter(|c| c.component_type() == ty)
                .cloned(),
        );
    }

    /// Number of attached components.
    #[must_use]
    pub fn component_count(&self) -> usize {
        self.inner.components.read().by_ref.len()
    }

    // ========================================================================
    // NOTIFICATIONS
    // ========================================================================

    /// Subscribes to component attachment.
    pub fn on_component_added<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ComponentHandle) + Send + Sync + 'static,
    {
        self.inner.on_add.subscribe(callback)
    }

    /// Subscribes to component detachment.
    pub fn on_component_removed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ComponentHandle) + Send + Sync + 'static,
    {
        self.inner.on_remove.subscribe(callback)
    }

    /// Cancels an `on_component_added` subscription.
    pub fn unsubscribe_added(&self, id: SubscriptionId) -> bool {
        self.inner.on_add.unsubscribe(id)
    }

    /// Cancels an `on_component_removed` subscription.
    pub fn unsubscribe_removed(&self, id: SubscriptionId) -> bool {
        self.inner.on_remove.unsubscribe(id)
    }

    /// Number of live subscriptions (added + removed).
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.on_add.len() + self.inner.on_remove.len()
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Entity {}

impl std::hash::Hash for Entity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner.id, f)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.inner.id)
            .field("kind", &self.kind)
            .field("world", &self.world_id())
            .field("components", &self.component_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::null_component;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct Position(i32, i32);

    impl ComponentData for Position {}

    #[derive(Clone, Default)]
    struct Health(u32);

    impl ComponentData for Health {
        const TAGS: ComponentTags = ComponentTags::SINGLE_TYPE;
    }

    #[derive(Clone, Default)]
    struct Name(&'static str);

    impl ComponentData for Name {
        const TAGS: ComponentTags = ComponentTags::SINGLE_TYPE;
    }

    #[test]
    fn test_display_is_32_hex_digits() {
        let entity = Entity::new();
        let text = entity.to_string();
        assert_eq!(text.len(), 32);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_singleton_violation() {
        let entity = Entity::new();
        entity.add(Health(10)).unwrap();
        // Different single types never conflict.
        entity.add(Name("orc")).unwrap();

        let second = Component::new(Health(20));
        assert_eq!(
            entity.add_component(second.clone()),
            Err(EcsError::SingletonViolation(std::any::type_name::<Health>()))
        );
        assert!(!second.is_attached());
        assert_eq!(entity.component_count(), 2);
        assert_eq!(entity.get_single_component::<Name>().unwrap().read_shared().0, "orc");
    }

    #[test]
    fn test_untagged_type_may_repeat() {
        let entity = Entity::new();
        entity.add(Position(0, 0)).unwrap();
        entity.add(Position(1, 2)).unwrap();

        let mut out = Vec::new();
        entity.components_of::<Position>(&mut out, true);
        assert_eq!(out.len(), 2);
        let sum: i32 = out
            .iter()
            .map(|p| {
                let p = p.read_shared();
                p.0 + p.1
            })
            .sum();
        assert_eq!(sum, 3);
        assert!(entity.get_single_component::<Position>().is_none());
        assert!(entity.get_component::<Position>().is_some());
    }

    #[test]
    fn test_attach_errors() {
        let a = Entity::new();
        let b = Entity::new();
        let c = a.add(Position::default()).unwrap();
        assert_eq!(
            b.add_component(c.clone()),
            Err(EcsError::AlreadyAttached(c.reference()))
        );
        assert_eq!(
            a.add_component(null_component(Position::default())),
            Err(EcsError::NullComponent)
        );
    }

    #[test]
    fn test_remove_notifies_only_on_success() {
        let entity = Entity::new();
        let removed = Arc::new(AtomicUsize::new(0));
        {
            let removed = Arc::clone(&removed);
            entity.on_component_removed(move |_| {
                removed.fetch_add(1, Ordering::SeqCst);
            });
        }

        let health: ComponentHandle = entity.add(Health(1)).unwrap();
        let stranger: ComponentHandle = Component::new(Health(2));
        assert!(!entity.remove_component(&stranger));
        assert!(entity.remove_component(&health));
        assert!(!entity.remove_component(&health));

        assert_eq!(removed.load(Ordering::SeqCst), 1);
        assert!(!health.is_attached());
        assert!(entity.get_single_component::<Health>().is_none());
        // Free again after removal.
        entity.add_component(health).unwrap();
    }

    #[test]
    fn test_copy_reference_shares_components_and_observers() {
        let original = Entity::new();
        let alias = original.copy_reference();
        assert_eq!(alias.kind(), EntityKind::CopyReference);
        assert_eq!(alias, original);

        let added = Arc::new(AtomicUsize::new(0));
        {
            let added = Arc::clone(&added);
            alias.on_component_added(move |_| {
                added.fetch_add(1, Ordering::SeqCst);
            });
        }
        original.add(Health(5)).unwrap();

        assert_eq!(added.load(Ordering::SeqCst), 1);
        let health = alias.get_single_component::<Health>().unwrap();
        assert_eq!(health.read_shared().0, 5);

        alias.set_enabled(false);
        assert!(!original.is_enabled());
    }

    #[test]
    fn test_with_components_rolls_back_on_error() {
        let health = Component::new(Health(1));
        let duplicate = Component::new(Health(2));
        let result = Entity::with_components([
            health.clone() as ComponentHandle,
            duplicate as ComponentHandle,
        ]);
        assert!(result.is_err());
        assert!(!health.is_attached());
    }

    #[test]
    fn test_get_components_clear_flag() {
        let entity = Entity::new();
        entity.add(Position::default()).unwrap();
        let mut out = vec![Component::new(Health(0)) as ComponentHandle];
        entity.get_components(&mut out, false);
        assert_eq!(out.len(), 2);
        entity.get_components(&mut out, true);
        assert_eq!(out.len(), 1);
    }
}
