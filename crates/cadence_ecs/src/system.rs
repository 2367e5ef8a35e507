//! # Systems
//!
//! A [`System`] is per-tick logic bound to one named thread and one cadence.
//! The [`SystemManager`] of a world owns its systems and registers one
//! scheduler entry point per system.
//!
//! ## Lifecycle
//!
//! ```text
//!   Created ──initialize()──> Initialized ──register──> Enabled ⇄ Disabled
//!                                                            │
//!                                              remove/clear  ▼
//!                                                        Disposed
//! ```
//!
//! ## Tick
//!
//! ```text
//!   entry point (system thread)
//!     ├─ lock the system
//!     ├─ deliver queued on_entity_enter / on_entity_left
//!     └─ update(dt)   only if system enabled AND world enabled
//! ```
//!
//! Membership notifications from the entity manager arrive on whatever
//! thread moved the entity; they are queued on a channel and delivered on
//! the system's own thread at its next tick.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use cadence_async::{names, EntryPoint, SystemsDispatcher};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, MutexGuard};

use crate::component::{ComponentType, OwnerToken};
use crate::dynamic_list::EntityDynamicList;
use crate::entity::Entity;
use crate::error::{EcsError, EcsResult};
use crate::manager::EntityManager;
use crate::observer::SubscriptionId;
use crate::world::WorldId;

// ============================================================================
// SYSTEM TRAIT
// ============================================================================

/// Per-tick logic of one world.
pub trait System: Send + 'static {
    /// Named thread this system runs on.
    fn thread(&self) -> &str {
        names::SYSTEMS
    }

    /// Update cadence in milliseconds. `None` runs at the default delay of
    /// the thread registry.
    fn delay_ms(&self) -> Option<u64> {
        None
    }

    /// Called once, synchronously, during registration.
    ///
    /// # Errors
    ///
    /// Any error aborts the registration.
    fn initialize(&mut self, _ctx: &SystemContext) -> EcsResult<()> {
        Ok(())
    }

    /// Advances the system by `delta_seconds`.
    ///
    /// # Errors
    ///
    /// Errors are logged by the scheduler and do not stop other systems.
    fn update(&mut self, ctx: &SystemContext, delta_seconds: f64) -> EcsResult<()>;

    /// An entity entered the world.
    fn on_entity_enter(&mut self, _ctx: &SystemContext, _entity: &Entity) {}

    /// An entity left the world.
    fn on_entity_left(&mut self, _ctx: &SystemContext, _entity: &Entity) {}

    /// The system was removed from its world.
    fn on_disposed(&mut self, _ctx: &SystemContext) {}
}

/// What a system sees of its world.
#[derive(Clone)]
pub struct SystemContext {
    world_id: WorldId,
    manager: Arc<EntityManager>,
    token: OwnerToken,
}

impl SystemContext {
    /// World the system belongs to.
    #[inline]
    #[must_use]
    pub const fn world_id(&self) -> WorldId {
        self.world_id
    }

    /// Entity manager of the world.
    #[inline]
    #[must_use]
    pub fn entities(&self) -> &Arc<EntityManager> {
        &self.manager
    }

    /// Write-lock token identifying this system.
    #[inline]
    #[must_use]
    pub const fn token(&self) -> OwnerToken {
        self.token
    }

    /// Builds a dynamic list over the world's entities.
    ///
    /// # Errors
    ///
    /// [`EcsError::EmptyTypeMask`] if `types` is empty.
    pub fn dynamic_list(&self, types: &[ComponentType]) -> EcsResult<EntityDynamicList> {
        self.manager.dynamic_list(types)
    }
}

impl fmt::Debug for SystemContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemContext")
            .field("world", &self.world_id)
            .field("token", &self.token)
            .finish()
    }
}

/// Lifecycle state of a registered system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemState {
    /// Constructed, not yet initialized.
    Created,
    /// `initialize` succeeded; not yet scheduled.
    Initialized,
    /// Scheduled and updating.
    Enabled,
    /// Scheduled; updates skipped.
    Disabled,
    /// Removed from its world.
    Disposed,
}

// ============================================================================
// SYSTEM CELL
// ============================================================================

enum Membership {
    Enter(Entity),
    Left(Entity),
}

struct SystemCell<S: System> {
    system: Mutex<S>,
    ctx: SystemContext,
    state: Mutex<SystemState>,
    world_enabled: Arc<AtomicBool>,
    disposed_delivered: AtomicBool,
    /// Thread currently inside `tick`, if any.
    ticking: Mutex<Option<ThreadId>>,
    events: Receiver<Membership>,
    subscriptions: Mutex<Option<(SubscriptionId, SubscriptionId)>>,
    thread: String,
    delay_ms: u64,
    entry_point: EntryPoint,
    dispatcher: Arc<SystemsDispatcher>,
}

impl<S: System> SystemCell<S> {
    fn is_disposed(&self) -> bool {
        *self.state.lock() == SystemState::Disposed
    }

    fn tick(&self, delta_seconds: f64) {
        let mut system = self.system.lock();
        if self.is_disposed() {
            return;
        }
        *self.ticking.lock() = Some(thread::current().id());

        for event in self.events.try_iter() {
            match event {
                Membership::Enter(entity) => system.on_entity_enter(&self.ctx, &entity),
                Membership::Left(entity) => system.on_entity_left(&self.ctx, &entity),
            }
        }

        let enabled = *self.state.lock() == SystemState::Enabled;
        if enabled && self.world_enabled.load(Ordering::Acquire) {
            if let Err(error) = system.update(&self.ctx, delta_seconds) {
                tracing::error!(
                    system = std::any::type_name::<S>(),
                    world = %self.ctx.world_id,
                    %error,
                    "system update failed"
                );
            }
        }

        // Disposed from inside its own update.
        if self.is_disposed() {
            self.deliver_disposed(&mut system);
        }
        *self.ticking.lock() = None;
    }

    fn deliver_disposed(&self, system: &mut S) {
        if !self.disposed_delivered.swap(true, Ordering::AcqRel) {
            system.on_disposed(&self.ctx);
        }
    }

    fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.lock();
        if matches!(*state, SystemState::Enabled | SystemState::Disabled) {
            *state = if enabled {
                SystemState::Enabled
            } else {
                SystemState::Disabled
            };
        }
    }

    fn unsubscribe(&self) {
        if let Some((transfer, remove)) = self.subscriptions.lock().take() {
            self.ctx.manager.unsubscribe_transfer(transfer);
            self.ctx.manager.unsubscribe_remove(remove);
        }
    }
}

trait AnySystemCell: Send + Sync + 'static {
    fn dispose(&self);

    fn type_name(&self) -> &'static str;

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<S: System> AnySystemCell for SystemCell<S> {
    fn dispose(&self) {
        {
            let mut state = self.state.lock();
            if *state == SystemState::Disposed {
                return;
            }
            *state = SystemState::Disposed;
        }

        self.dispatcher
            .remove_entry_point(&self.thread, &self.entry_point, self.delay_ms);
        self.unsubscribe();

        let on_tick_thread = *self.ticking.lock() == Some(thread::current().id());
        if !on_tick_thread {
            let mut system = self.system.lock();
            self.deliver_disposed(&mut system);
        }
        tracing::debug!(system = self.type_name(), world = %self.ctx.world_id, "system disposed");
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<S>()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Shared handle to a registered system.
pub struct SystemRef<S: System> {
    cell: Arc<SystemCell<S>>,
}

impl<S: System> SystemRef<S> {
    /// Locks the system for direct access. Blocks while it ticks.
    pub fn lock(&self) -> MutexGuard<'_, S> {
        self.cell.system.lock()
    }

    /// Returns true if the system's own flag is set.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state() == SystemState::Enabled
    }

    /// Enables or disables updates. No effect once disposed.
    pub fn set_enabled(&self, enabled: bool) {
        self.cell.set_enabled(enabled);
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> SystemState {
        *self.cell.state.lock()
    }

    /// Returns true once removed from the world.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.cell.is_disposed()
    }

    /// Context handed to the system's callbacks.
    #[must_use]
    pub fn context(&self) -> &SystemContext {
        &self.cell.ctx
    }

    /// Runs one tick on the calling thread, outside the scheduler.
    ///
    /// # Errors
    ///
    /// [`EcsError::SystemDisposed`] once the system was removed.
    pub fn tick(&self, delta_seconds: f64) -> EcsResult<()> {
        if self.is_disposed() {
            return Err(EcsError::SystemDisposed(std::any::type_name::<S>()));
        }
        self.cell.tick(delta_seconds);
        Ok(())
    }
}

impl<S: System> Clone for SystemRef<S> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<S: System> fmt::Debug for SystemRef<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemRef")
            .field("system", &std::any::type_name::<S>())
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// SYSTEM MANAGER
// ============================================================================

/// Systems of one world, at most one per type.
pub struct SystemManager {
    world_id: WorldId,
    manager: Arc<EntityManager>,
    dispatcher: Arc<SystemsDispatcher>,
    world_enabled: Arc<AtomicBool>,
    systems: Mutex<HashMap<TypeId, Arc<dyn AnySystemCell>>>,
}

impl SystemManager {
    pub(crate) fn new(
        world_id: WorldId,
        manager: Arc<EntityManager>,
        dispatcher: Arc<SystemsDispatcher>,
        world_enabled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            world_id,
            manager,
            dispatcher,
            world_enabled,
            systems: Mutex::new(HashMap::new()),
        }
    }

    /// Initializes `system` and schedules it on its thread and cadence.
    ///
    /// # Errors
    ///
    /// [`EcsError::DuplicateSystem`] if a system of type `S` is registered,
    /// the error returned by `initialize`, or [`EcsError::Async`] if the
    /// scheduler thread cannot start.
    pub fn add_system<S: System>(&self, mut system: S) -> EcsResult<SystemRef<S>> {
        let type_id = TypeId::of::<S>();
        let type_name = std::any::type_name::<S>();
        if self.systems.lock().contains_key(&type_id) {
            return Err(EcsError::DuplicateSystem(type_name));
        }

        let ctx = SystemContext {
            world_id: self.world_id,
            manager: Arc::clone(&self.manager),
            token: OwnerToken::new(),
        };
        system.initialize(&ctx)?;

        let mut systems = self.systems.lock();
        if systems.contains_key(&type_id) {
            return Err(EcsError::DuplicateSystem(type_name));
        }

        let thread = system.thread().to_string();
        let delay_ms = system.delay_ms().unwrap_or_else(|| {
            let default_delay = self.dispatcher.registry().options().default_delay;
            u64::try_from(default_delay.as_millis()).unwrap_or(u64::MAX)
        });
        let (sender, events) = crossbeam_channel::unbounded();
        let cell = Arc::new_cyclic(|weak: &Weak<SystemCell<S>>| {
            let weak = weak.clone();
            let entry_point: EntryPoint = Arc::new(move |delta_seconds: f64| {
                if let Some(cell) = weak.upgrade() {
                    cell.tick(delta_seconds);
                }
            });
            SystemCell {
                system: Mutex::new(system),
                ctx,
                state: Mutex::new(SystemState::Initialized),
                world_enabled: Arc::clone(&self.world_enabled),
                disposed_delivered: AtomicBool::new(false),
                ticking: Mutex::new(None),
                events,
                subscriptions: Mutex::new(None),
                thread,
                delay_ms,
                entry_point,
                dispatcher: Arc::clone(&self.dispatcher),
            }
        });

        *cell.subscriptions.lock() = Some(self.subscribe(sender));
        *cell.state.lock() = SystemState::Enabled;

        let registered = self.dispatcher.register_entry_point(
            &cell.thread,
            Arc::clone(&cell.entry_point),
            cell.delay_ms,
        );
        if let Err(error) = registered {
            cell.unsubscribe();
            *cell.state.lock() = SystemState::Disposed;
            return Err(error.into());
        }

        tracing::debug!(
            system = type_name,
            world = %self.world_id,
            thread = %cell.thread,
            delay_ms = cell.delay_ms,
            "system registered"
        );
        systems.insert(type_id, Arc::clone(&cell) as Arc<dyn AnySystemCell>);
        Ok(SystemRef { cell })
    }

    fn subscribe(&self, sender: Sender<Membership>) -> (SubscriptionId, SubscriptionId) {
        let enter = sender.clone();
        let transfer = self.manager.on_transfer(move |entity| {
            let _ = enter.send(Membership::Enter(entity.clone()));
        });
        let remove = self.manager.on_remove(move |entity| {
            let _ = sender.send(Membership::Left(entity.clone()));
        });
        (transfer, remove)
    }

    /// Disposes and unregisters the system of type `S`.
    /// Returns false if none was registered.
    pub fn remove_system<S: System>(&self) -> bool {
        let removed = self.systems.lock().remove(&TypeId::of::<S>());
        match removed {
            Some(cell) => {
                cell.dispose();
                true
            }
            None => false,
        }
    }

    /// Handle to the system of type `S`.
    #[must_use]
    pub fn get_system<S: System>(&self) -> Option<SystemRef<S>> {
        let cell = self.systems.lock().get(&TypeId::of::<S>()).cloned()?;
        let cell = cell.as_any().downcast::<SystemCell<S>>().ok()?;
        Some(SystemRef { cell })
    }

    /// Returns true if a system of type `S` is registered.
    #[must_use]
    pub fn has_system<S: System>(&self) -> bool {
        self.systems.lock().contains_key(&TypeId::of::<S>())
    }

    /// Number of registered systems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.systems.lock().len()
    }

    /// Returns true if no system is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.systems.lock().is_empty()
    }

    /// Disposes every system.
    pub fn clear(&self) {
        let drained: Vec<_> = self.systems.lock().drain().map(|(_, cell)| cell).collect();
        for cell in drained {
            cell.dispose();
        }
    }
}

impl Drop for SystemManager {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for SystemManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self
            .systems
            .lock()
            .values()
            .map(|cell| cell.type_name())
            .collect();
        f.debug_struct("SystemManager")
            .field("world", &self.world_id)
            .field("systems", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_async::{ThreadRegistry, MAIN_THREAD};

    #[derive(Default)]
    struct Counter {
        updates: usize,
        entered: usize,
        left: usize,
        disposed: bool,
        fail: bool,
    }

    impl System for Counter {
        fn thread(&self) -> &str {
            MAIN_THREAD
        }

        fn update(&mut self, _ctx: &SystemContext, _dt: f64) -> EcsResult<()> {
            self.updates += 1;
            if self.fail {
                return Err(EcsError::System("requested failure".into()));
            }
            Ok(())
        }

        fn on_entity_enter(&mut self, _ctx: &SystemContext, _entity: &Entity) {
            self.entered += 1;
        }

        fn on_entity_left(&mut self, _ctx: &SystemContext, _entity: &Entity) {
            self.left += 1;
        }

        fn on_disposed(&mut self, _ctx: &SystemContext) {
            self.disposed = true;
        }
    }

    struct Refuses;

    impl System for Refuses {
        fn initialize(&mut self, _ctx: &SystemContext) -> EcsResult<()> {
            Err(EcsError::System("not today".into()))
        }

        fn update(&mut self, _ctx: &SystemContext, _dt: f64) -> EcsResult<()> {
            Ok(())
        }
    }

    fn fixture() -> (Arc<SystemsDispatcher>, Arc<AtomicBool>, SystemManager) {
        let dispatcher = Arc::new(SystemsDispatcher::new(Arc::new(ThreadRegistry::new())));
        let world_enabled = Arc::new(AtomicBool::new(true));
        let manager = Arc::new(EntityManager::new(WorldId::new(1)));
        let systems = SystemManager::new(
            WorldId::new(1),
            manager,
            Arc::clone(&dispatcher),
            Arc::clone(&world_enabled),
        );
        (dispatcher, world_enabled, systems)
    }

    #[test]
    fn test_duplicate_system_rejected() {
        let (_dispatcher, _enabled, systems) = fixture();
        systems.add_system(Counter::default()).unwrap();
        let err = systems.add_system(Counter::default()).unwrap_err();
        assert!(matches!(err, EcsError::DuplicateSystem(_)));
        assert_eq!(systems.len(), 1);
    }

    #[test]
    fn test_initialize_failure_aborts_registration() {
        let (_dispatcher, _enabled, systems) = fixture();
        assert!(systems.add_system(Refuses).is_err());
        assert!(!systems.has_system::<Refuses>());
    }

    #[test]
    fn test_update_requires_both_flags() {
        let (dispatcher, world_enabled, systems) = fixture();
        let counter = systems.add_system(Counter::default()).unwrap();
        assert_eq!(counter.state(), SystemState::Enabled);

        dispatcher.tick_main(0.05);
        counter.set_enabled(false);
        dispatcher.tick_main(0.05);
        counter.set_enabled(true);
        world_enabled.store(false, Ordering::Release);
        dispatcher.tick_main(0.05);
        world_enabled.store(true, Ordering::Release);
        dispatcher.tick_main(0.05);

        assert_eq!(counter.lock().updates, 2);
    }

    #[test]
    fn test_membership_hooks_delivered_on_tick() {
        let (dispatcher, _enabled, systems) = fixture();
        let counter = systems.add_system(Counter::default()).unwrap();
        let manager = Arc::clone(counter.context().entities());

        let entity = manager.create_entity(Vec::new()).unwrap();
        manager.remove_entity(&entity);
        assert_eq!(counter.lock().entered, 0);

        dispatcher.tick_main(0.05);
        let system = counter.lock();
        assert_eq!((system.entered, system.left), (1, 1));
    }

    #[test]
    fn test_update_error_is_isolated() {
        let (dispatcher, _enabled, systems) = fixture();
        let counter = systems
            .add_system(Counter {
                fail: true,
                ..Counter::default()
            })
            .unwrap();
        assert_eq!(dispatcher.tick_main(0.05), 0);
        dispatcher.tick_main(0.05);
        assert_eq!(counter.lock().updates, 2);
    }

    #[test]
    fn test_remove_system_disposes() {
        let (dispatcher, _enabled, systems) = fixture();
        let counter = systems.add_system(Counter::default()).unwrap();
        let manager = Arc::clone(counter.context().entities());
        assert_eq!(manager.subscription_count(), 2);

        assert!(systems.remove_system::<Counter>());
        assert!(!systems.remove_system::<Counter>());
        assert!(counter.is_disposed());
        assert!(counter.lock().disposed);
        assert_eq!(manager.subscription_count(), 0);

        dispatcher.tick_main(0.05);
        assert_eq!(counter.lock().updates, 0);
        assert!(matches!(counter.tick(0.05), Err(EcsError::SystemDisposed(_))));
        assert!(systems.get_system::<Counter>().is_none());
    }

    #[test]
    fn test_get_system_downcasts() {
        let (_dispatcher, _enabled, systems) = fixture();
        systems.add_system(Counter::default()).unwrap();
        let found = systems.get_system::<Counter>().unwrap();
        found.tick(0.05).unwrap();
        assert_eq!(found.lock().updates, 1);
        assert!(systems.get_system::<Refuses>().is_none());
    }
}
