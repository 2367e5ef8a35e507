//! # Entity Dynamic List
//!
//! An incrementally maintained index of the entities of one manager,
//! filtered by a fixed component-type mask.
//!
//! ## Maintenance
//!
//! ```text
//!   EntityManager ── on_transfer ──> new Handler(entity)
//!                 └─ on_remove ───> Handler::dispose()
//!
//!   Entity ── on_component_added ───> Handler: push if type in mask
//!          └─ on_component_removed ─> Handler: drop if present
//! ```
//!
//! The manager is scanned once at construction; afterwards only
//! notifications keep the list current. Iteration yields handlers holding
//! at least one component of the mask.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::component::{downcast, same_component, Component, ComponentData, ComponentHandle, ComponentType};
use crate::entity::Entity;
use crate::error::{EcsError, EcsResult};
use crate::manager::EntityManager;
use crate::observer::SubscriptionId;

// ============================================================================
// HANDLER
// ============================================================================

struct HandlerState {
    /// Matching components per mask type, in insertion order.
    lists: HashMap<ComponentType, Vec<ComponentHandle>>,
    count: usize,
    subscriptions: Option<(SubscriptionId, SubscriptionId)>,
}

/// Matching components of one tracked entity.
pub struct Handler {
    entity: Entity,
    state: Mutex<HandlerState>,
    disposed: AtomicBool,
}

impl Handler {
    /// Tracks `entity` for `types` and seeds from its current components.
    fn track(entity: Entity, types: &[ComponentType]) -> Arc<Self> {
        let handler = Arc::new(Self {
            entity,
            state: Mutex::new(HandlerState {
                lists: types.iter().map(|ty| (*ty, Vec::new())).collect(),
                count: 0,
                subscriptions: None,
            }),
            disposed: AtomicBool::new(false),
        });

        // Subscribe before seeding so nothing attached in between is missed.
        let added = {
            let weak = Arc::downgrade(&handler);
            handler.entity.on_component_added(move |component| {
                if let Some(handler) = weak.upgrade() {
                    handler.insert(component);
                }
            })
        };
        let removed = {
            let weak = Arc::downgrade(&handler);
            handler.entity.on_component_removed(move |component| {
                if let Some(handler) = weak.upgrade() {
                    handler.remove(component);
                }
            })
        };
        handler.state.lock().subscriptions = Some((added, removed));

        let mut current = Vec::new();
        for ty in types {
            handler.entity.components_of_type(*ty, &mut current, true);
            for component in &current {
                handler.insert(component);
            }
        }
        handler
    }

    fn insert(&self, component: &ComponentHandle) {
        if self.is_disposed() {
            return;
        }
        let mut state = self.state.lock();
        let Some(list) = state.lists.get_mut(&component.component_type()) else {
            return;
        };
        if list.iter().any(|c| same_component(c, component)) {
            return;
        }
        list.push(Arc::clone(component));
        state.count += 1;
    }

    fn remove(&self, component: &ComponentHandle) {
        if self.is_disposed() {
            return;
        }
        let mut state = self.state.lock();
        let Some(list) = state.lists.get_mut(&component.component_type()) else {
            return;
        };
        let before = list.len();
        list.retain(|c| !same_component(c, component));
        if list.len() != before {
            state.count -= 1;
        }
    }

    /// Unsubscribes from the entity and forgets every component.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.state.lock();
        if let Some((added, removed)) = state.subscriptions.take() {
            self.entity.unsubscribe_added(added);
            self.entity.unsubscribe_removed(removed);
        }
        state.lists.clear();
        state.count = 0;
    }

    /// Tracked entity.
    #[inline]
    #[must_use]
    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    /// Returns true once disposed.
    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Returns true if no component of the mask is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().count == 0
    }

    /// Number of matching components across all mask types.
    #[must_use]
    pub fn component_count(&self) -> usize {
        self.state.lock().count
    }

    /// Returns true if every mask type has at least one component.
    #[must_use]
    pub fn has_all_types(&self) -> bool {
        let state = self.state.lock();
        !state.lists.is_empty() && state.lists.values().all(|list| !list.is_empty())
    }

    /// First held component of type `T`.
    #[must_use]
    pub fn get_component<T: ComponentData>(&self) -> Option<Arc<Component<T>>> {
        self.state
            .lock()
            .lists
            .get(&ComponentType::of::<T>())
            .and_then(|list| list.first())
            .and_then(downcast::<T>)
    }

    /// Appends every held component of type `T` to `out`.
    ///
    /// Returns false if `T` is not in the mask or none is held.
    pub fn get_components<T: ComponentData>(&self, out: &mut Vec<Arc<Component<T>>>) -> bool {
        let state = self.state.lock();
        match state.lists.get(&ComponentType::of::<T>()) {
            Some(list) if !list.is_empty() => {
                out.extend(list.iter().filter_map(downcast::<T>));
                true
            }
            _ => false,
        }
    }

    /// Held components of type `ty`, in insertion order.
    #[must_use]
    pub fn components_of_type(&self, ty: ComponentType) -> Vec<ComponentHandle> {
        self.state.lock().lists.get(&ty).cloned().unwrap_or_default()
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("entity", &self.entity.id())
            .field("components", &self.component_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ============================================================================
// LIST
// ============================================================================

struct ListState {
    types: Vec<ComponentType>,
    handlers: Mutex<Vec<Arc<Handler>>>,
    manager: Weak<EntityManager>,
}

impl ListState {
    /// Tracks `entity` if it is still a member. Checked under the handler
    /// lock, so a removal either happened before (skipped) or its
    /// `on_remove` runs after (disposed).
    fn add_entity(&self, entity: &Entity) {
        let mut handlers = self.handlers.lock();
        if handlers.iter().any(|h| h.entity() == entity) {
            return;
        }
        let is_member = self
            .manager
            .upgrade()
            .is_some_and(|manager| manager.contains(entity.id()));
        if !is_member {
            return;
        }
        handlers.push(Handler::track(entity.clone(), &self.types));
    }

    fn remove_entity(&self, entity: &Entity) {
        let removed = {
            let mut handlers = self.handlers.lock();
            let Some(index) = handlers.iter().position(|h| h.entity() == entity) else {
                return;
            };
            handlers.remove(index)
        };
        removed.dispose();
    }
}

/// Entities of a manager matching a component-type mask.
///
/// Dropping the list unsubscribes it from the manager and disposes every
/// handler.
pub struct EntityDynamicList {
    state: Arc<ListState>,
    manager: Weak<EntityManager>,
    subscriptions: (SubscriptionId, SubscriptionId),
}

impl EntityDynamicList {
    /// Builds the list with one full scan of `manager`.
    ///
    /// # Errors
    ///
    /// [`EcsError::EmptyTypeMask`] if `types` is empty.
    pub fn new(manager: &Arc<EntityManager>, types: &[ComponentType]) -> EcsResult<Self> {
        if types.is_empty() {
            return Err(EcsError::EmptyTypeMask);
        }
        let mut mask: Vec<ComponentType> = Vec::with_capacity(types.len());
        for ty in types {
            if !mask.contains(ty) {
                mask.push(*ty);
            }
        }

        let state = Arc::new(ListState {
            types: mask,
            handlers: Mutex::new(Vec::with_capacity(manager.len())),
            manager: Arc::downgrade(manager),
        });

        let transfer = {
            let weak = Arc::downgrade(&state);
            manager.on_transfer(move |entity| {
                if let Some(state) = weak.upgrade() {
                    state.add_entity(entity);
                }
            })
        };
        let remove = {
            let weak = Arc::downgrade(&state);
            manager.on_remove(move |entity| {
                if let Some(state) = weak.upgrade() {
                    state.remove_entity(entity);
                }
            })
        };

        for entity in manager.entities() {
            state.add_entity(&entity);
        }

        Ok(Self {
            state,
            manager: Arc::downgrade(manager),
            subscriptions: (transfer, remove),
        })
    }

    /// The type mask.
    #[must_use]
    pub fn types(&self) -> &[ComponentType] {
        &self.state.types
    }

    /// Live handlers holding at least one mask component.
    #[must_use]
    pub fn iter(&self) -> Vec<Arc<Handler>> {
        self.state
            .handlers
            .lock()
            .iter()
            .filter(|h| !h.is_disposed() && !h.is_empty())
            .cloned()
            .collect()
    }

    /// Live handlers whose entity is enabled.
    #[must_use]
    pub fn active_handlers(&self) -> Vec<Arc<Handler>> {
        self.state
            .handlers
            .lock()
            .iter()
            .filter(|h| !h.is_disposed() && h.entity().is_enabled())
            .cloned()
            .collect()
    }

    /// Handler of `entity`, if tracked.
    #[must_use]
    pub fn handler(&self, entity: &Entity) -> Option<Arc<Handler>> {
        self.state
            .handlers
            .lock()
            .iter()
            .find(|h| h.entity() == entity)
            .cloned()
    }

    /// Number of handlers yielded by [`EntityDynamicList::iter`].
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().len()
    }

    /// Returns true if no handler matches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tracked entities, matching or not.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.state.handlers.lock().len()
    }
}

impl Drop for EntityDynamicList {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.unsubscribe_transfer(self.subscriptions.0);
            manager.unsubscribe_remove(self.subscriptions.1);
        }
        let handlers = std::mem::take(&mut *self.state.handlers.lock());
        for handler in handlers {
            handler.dispose();
        }
    }
}

impl std::fmt::Debug for EntityDynamicList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.state.types.iter().map(|ty| ty.name()).collect();
        f.debug_struct("EntityDynamicList")
            .field("types", &names)
            .field("tracked", &self.tracked())
            .finish()
    }
}
