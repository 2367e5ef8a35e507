//! # Component Store
//!
//! A [`Component`] wraps one plain data value behind an exclusive-write /
//! shared-read protocol keyed by an opaque [`OwnerToken`].
//!
//! ## Protocol
//!
//! ```text
//!                open_write(t)                     close_write(t, v)
//!   Unlocked ───────────────────> Locked(t) ───────────────────────> Unlocked
//!      ▲                           │    ▲                              (data = v)
//!      │                           │    │ open_write(t) / read(t): no wait
//!      │                           └────┘
//!      └── open_write(u) / read(u) from any other token waits here
//! ```
//!
//! - The stored value only changes inside `close_write`, as one assignment
//!   under the slot mutex. Readers never see a half-written value.
//! - Waiters park on a condition variable and are woken on release; there is
//!   no fairness guarantee among them.
//! - A writer must not hold the lock across a blocking hand-off to another
//!   thread that needs the same component.

use std::any::{Any, TypeId};
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{EcsError, EcsResult};

// ============================================================================
// IDENTITIES
// ============================================================================

static NEXT_REFERENCE: AtomicU32 = AtomicU32::new(1);
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Process-wide component reference, assigned at construction, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ComponentRef(u32);

impl ComponentRef {
    /// The null reference. Never assigned to a live component.
    pub const NULL: Self = Self(0);

    fn next() -> Self {
        Self(NEXT_REFERENCE.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Checks if this is the null reference.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque identity of a writer.
///
/// Usually one token per system; any caller may create its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct OwnerToken(NonZeroU64);

impl OwnerToken {
    /// Creates a token distinct from every other token in the process.
    #[must_use]
    pub fn new() -> Self {
        let raw = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    /// Raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TAGS
// ============================================================================

/// 64 independent capability flags of a component.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ComponentTags(u64);

impl ComponentTags {
    /// No flags.
    pub const NONE: Self = Self(0);

    /// At most one component of this concrete type per entity.
    pub const SINGLE_TYPE: Self = Self(1);

    /// Builds tags from raw bits.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Checks that every flag of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns these tags with `other` added.
    #[inline]
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns these tags with `other` removed.
    #[inline]
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl std::ops::BitOr for ComponentTags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

// ============================================================================
// DATA
// ============================================================================

/// Plain data stored in a component.
///
/// # Example
///
/// ```rust
/// use cadence_ecs::{ComponentData, ComponentTags};
///
/// #[derive(Clone, Default)]
/// struct Health(u32);
///
/// impl ComponentData for Health {
///     const TAGS: ComponentTags = ComponentTags::SINGLE_TYPE;
/// }
/// ```
pub trait ComponentData: Clone + Default + Send + Sync + 'static {
    /// Tags given to every new component of this type.
    const TAGS: ComponentTags = ComponentTags::NONE;
}

/// Concrete component type, used as a key in type masks.
#[derive(Clone, Copy, Debug)]
pub struct ComponentType {
    id: TypeId,
    name: &'static str,
}

impl ComponentType {
    /// Type of `Component<T>`.
    #[must_use]
    pub fn of<T: ComponentData>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Type id of the data type.
    #[inline]
    #[must_use]
    pub const fn id(self) -> TypeId {
        self.id
    }

    /// Name of the data type.
    #[inline]
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.name
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ComponentType {}

impl std::hash::Hash for ComponentType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// ============================================================================
// COMPONENT
// ============================================================================

struct Slot<T> {
    data: T,
    /// `Some` iff write-locked.
    owner: Option<OwnerToken>,
}

/// A typed value with an exclusive-write / shared-read protocol.
pub struct Component<T: ComponentData> {
    reference: ComponentRef,
    tags: AtomicU64,
    slot: Mutex<Slot<T>>,
    released: Condvar,
    attached: AtomicBool,
}

impl<T: ComponentData> Component<T> {
    /// Creates a detached component holding `data` with the type's tags.
    #[must_use]
    pub fn new(data: T) -> Arc<Self> {
        Arc::new(Self::with_reference(ComponentRef::next(), data))
    }

    /// Creates a detached component holding `T::default()`.
    #[must_use]
    pub fn new_default() -> Arc<Self> {
        Self::new(T::default())
    }

    fn with_reference(reference: ComponentRef, data: T) -> Self {
        Self {
            reference,
            tags: AtomicU64::new(T::TAGS.bits()),
            slot: Mutex::new(Slot { data, owner: None }),
            released: Condvar::new(),
            attached: AtomicBool::new(false),
        }
    }

    /// Process-wide reference of this component.
    #[inline]
    #[must_use]
    pub fn reference(&self) -> ComponentRef {
        self.reference
    }

    /// Current tags.
    #[inline]
    #[must_use]
    pub fn tags(&self) -> ComponentTags {
        ComponentTags(self.tags.load(Ordering::Acquire))
    }

    /// Checks that every flag of `tag` is set.
    #[inline]
    #[must_use]
    pub fn has_tag(&self, tag: ComponentTags) -> bool {
        self.tags().contains(tag)
    }

    /// Sets the flags of `tag`.
    ///
    /// Singleton enforcement reads the tags at attach time only.
    pub fn add_tag(&self, tag: ComponentTags) {
        self.tags.fetch_or(tag.bits(), Ordering::AcqRel);
    }

    /// Clears the flags of `tag`.
    pub fn remove_tag(&self, tag: ComponentTags) {
        self.tags.fetch_and(!tag.bits(), Ordering::AcqRel);
    }

    /// Takes the write lock for `token` and returns the current value.
    ///
    /// If `token` already holds the lock, returns at once without taking it
    /// again. Otherwise blocks until the component is unlocked.
    #[must_use]
    pub fn open_write(&self, token: OwnerToken) -> T {
        let mut slot = self.slot.lock();
        if slot.owner == Some(token) {
            return slot.data.clone();
        }
        while slot.owner.is_some() {
            self.released.wait(&mut slot);
        }
        slot.owner = Some(token);
        slot.data.clone()
    }

    /// Commits `value` and releases the lock held by `token`.
    ///
    /// Returns `Ok(false)` without storing anything if another token holds
    /// the lock.
    ///
    /// # Errors
    ///
    /// [`EcsError::NotWriteLocked`] if the component is not locked.
    pub fn close_write(&self, token: OwnerToken, value: T) -> EcsResult<bool> {
        let mut slot = self.slot.lock();
        match slot.owner {
            None => Err(EcsError::NotWriteLocked(self.reference)),
            Some(owner) if owner != token => Ok(false),
            Some(_) => {
                slot.data = value;
                slot.owner = None;
                drop(slot);
                self.released.notify_all();
                Ok(true)
            }
        }
    }

    /// Returns the value; waits for a foreign writer to close first.
    ///
    /// The current writer reading with its own token never waits.
    #[must_use]
    pub fn read(&self, token: OwnerToken) -> T {
        let mut slot = self.slot.lock();
        if slot.owner == Some(token) {
            return slot.data.clone();
        }
        while slot.owner.is_some() {
            self.released.wait(&mut slot);
        }
        slot.data.clone()
    }

    /// Returns the value once no writer holds the lock.
    #[must_use]
    pub fn read_shared(&self) -> T {
        let mut slot = self.slot.lock();
        while slot.owner.is_some() {
            self.released.wait(&mut slot);
        }
        slot.data.clone()
    }

    /// Returns the value if unlocked, without waiting.
    #[must_use]
    pub fn try_read(&self) -> Option<T> {
        let slot = self.slot.lock();
        slot.owner.is_none().then(|| slot.data.clone())
    }

    /// Opens, mutates and closes in one call.
    ///
    /// # Errors
    ///
    /// [`EcsError::WriteReentered`] if `token` already holds the lock; the
    /// outer writer's pending value would otherwise be lost.
    pub fn write<R>(&self, token: OwnerToken, f: impl FnOnce(&mut T) -> R) -> EcsResult<R> {
        if self.owner() == Some(token) {
            return Err(EcsError::WriteReentered(self.reference));
        }
        let mut value = self.open_write(token);
        let result = f(&mut value);
        self.close_write(token, value)?;
        Ok(result)
    }

    /// Returns true while a writer holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.slot.lock().owner.is_some()
    }

    /// Token currently holding the lock.
    #[must_use]
    pub fn owner(&self) -> Option<OwnerToken> {
        self.slot.lock().owner
    }

    /// Returns true while attached to an entity.
    #[inline]
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }
}

impl<T: ComponentData> fmt::Debug for Component<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("type", &std::any::type_name::<T>())
            .field("reference", &self.reference)
            .field("tags", &self.tags())
            .field("locked", &self.is_locked())
            .finish()
    }
}

// ============================================================================
// TYPE ERASURE
// ============================================================================

/// Type-erased view of a `Component<T>` as stored by entities.
pub trait AnyComponent: Send + Sync + 'static {
    /// Process-wide reference.
    fn reference(&self) -> ComponentRef;

    /// Current tags.
    fn tags(&self) -> ComponentTags;

    /// Concrete data type.
    fn component_type(&self) -> ComponentType;

    /// Returns true while attached to an entity.
    fn is_attached(&self) -> bool;

    /// Marks the component attached. Returns false if it already was.
    #[doc(hidden)]
    fn try_attach(&self) -> bool;

    /// Marks the component detached.
    #[doc(hidden)]
    fn detach(&self);

    /// Upcast for downcasting back to `Component<T>`.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: ComponentData> AnyComponent for Component<T> {
    fn reference(&self) -> ComponentRef {
        self.reference
    }

    fn tags(&self) -> ComponentTags {
        Component::tags(self)
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::of::<T>()
    }

    fn is_attached(&self) -> bool {
        Component::is_attached(self)
    }

    fn try_attach(&self) -> bool {
        self.attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Shared, type-erased component.
pub type ComponentHandle = Arc<dyn AnyComponent>;

/// Recovers the typed component behind `handle`.
#[must_use]
pub fn downcast<T: ComponentData>(handle: &ComponentHandle) -> Option<Arc<Component<T>>> {
    Arc::clone(handle).as_any().downcast::<Component<T>>().ok()
}

/// Identity comparison of two handles.
#[inline]
#[must_use]
pub fn same_component(a: &ComponentHandle, b: &ComponentHandle) -> bool {
    a.reference() == b.reference()
}

#[cfg(test)]
pub(crate) fn null_component<T: ComponentData>(data: T) -> Arc<Component<T>> {
    Arc::new(Component::with_reference(ComponentRef::NULL, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[derive(Clone, Debug, Default, PartialEq)]
    struct Counter(u64);

    impl ComponentData for Counter {}

    #[derive(Clone, Default)]
    struct Single;

    impl ComponentData for Single {
        const TAGS: ComponentTags = ComponentTags::SINGLE_TYPE;
    }

    #[test]
    fn test_references_are_unique_and_non_null() {
        let a = Component::new(Counter(0));
        let b = Component::new(Counter(0));
        assert!(!a.reference().is_null());
        assert_ne!(a.reference(), b.reference());
    }

    #[test]
    fn test_default_tags_from_type() {
        assert!(Component::new(Single).has_tag(ComponentTags::SINGLE_TYPE));

        let c = Component::new(Counter(0));
        assert!(!c.has_tag(ComponentTags::SINGLE_TYPE));
        c.add_tag(ComponentTags::from_bits(0b110));
        assert_eq!(c.tags().bits(), 0b110);
        c.remove_tag(ComponentTags::from_bits(0b010));
        assert_eq!(c.tags().bits(), 0b100);
    }

    #[test]
    fn test_open_close_commits_value() {
        let c = Component::new(Counter(1));
        let token = OwnerToken::new();

        let mut value = c.open_write(token);
        assert!(c.is_locked());
        value.0 += 41;
        assert_eq!(c.close_write(token, value), Ok(true));
        assert!(!c.is_locked());
        assert_eq!(c.read_shared(), Counter(42));
    }

    #[test]
    fn test_reentrant_open_returns_pre_close_value() {
        let c = Component::new(Counter(7));
        let token = OwnerToken::new();

        let _ = c.open_write(token);
        // Same token: no wait, still the committed value.
        assert_eq!(c.open_write(token), Counter(7));
        assert_eq!(c.read(token), Counter(7));
        assert_eq!(c.owner(), Some(token));
        assert_eq!(c.close_write(token, Counter(8)), Ok(true));
    }

    #[test]
    fn test_close_with_foreign_token_is_ignored() {
        let c = Component::new(Counter(0));
        let writer = OwnerToken::new();
        let other = OwnerToken::new();

        let _ = c.open_write(writer);
        assert_eq!(c.close_write(other, Counter(99)), Ok(false));
        assert!(c.is_locked());
        assert_eq!(c.close_write(writer, Counter(1)), Ok(true));
        assert_eq!(c.read_shared(), Counter(1));
    }

    #[test]
    fn test_close_unlocked_is_an_error() {
        let c = Component::new(Counter(0));
        assert_eq!(
            c.close_write(OwnerToken::new(), Counter(1)),
            Err(EcsError::NotWriteLocked(c.reference()))
        );
    }

    #[test]
    fn test_try_read_does_not_wait() {
        let c = Component::new(Counter(3));
        let token = OwnerToken::new();
        assert_eq!(c.try_read(), Some(Counter(3)));
        let _ = c.open_write(token);
        assert_eq!(c.try_read(), None);
        c.close_write(token, Counter(4)).unwrap();
        assert_eq!(c.try_read(), Some(Counter(4)));
    }

    #[test]
    fn test_write_helper_and_reentry() {
        let c = Component::new(Counter(0));
        let token = OwnerToken::new();
        let doubled = c.write(token, |v| {
            v.0 = 5;
            v.0 * 2
        });
        assert_eq!(doubled, Ok(10));
        assert_eq!(c.read_shared(), Counter(5));

        let _ = c.open_write(token);
        assert_eq!(
            c.write(token, |v| v.0 = 6),
            Err(EcsError::WriteReentered(c.reference()))
        );
    }

    #[test]
    fn test_reader_waits_for_writer() {
        let c = Component::new(Counter(0));
        let writer = OwnerToken::new();
        let _ = c.open_write(writer);

        let reader = {
            let c = Arc::clone(&c);
            thread::spawn(move || c.read(OwnerToken::new()))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!reader.is_finished());

        c.close_write(writer, Counter(5)).unwrap();
        assert_eq!(reader.join().unwrap(), Counter(5));
    }

    #[test]
    fn test_writers_are_exclusive() {
        let c = Component::new(Counter(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    let token = OwnerToken::new();
                    for _ in 0..500 {
                        let mut v = c.open_write(token);
                        v.0 += 1;
                        c.close_write(token, v).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(c.read_shared(), Counter(4000));
    }

    #[test]
    fn test_downcast() {
        let c = Component::new(Counter(2));
        let handle: ComponentHandle = c.clone();
        assert_eq!(handle.component_type(), ComponentType::of::<Counter>());
        let back = downcast::<Counter>(&handle).unwrap();
        assert!(Arc::ptr_eq(&back, &c));
        assert!(downcast::<Single>(&handle).is_none());
    }
}
