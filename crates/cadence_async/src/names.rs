//! Well-known thread names.
//!
//! Systems and services pass these to
//! [`SystemsDispatcher::register_entry_point`](crate::SystemsDispatcher::register_entry_point)
//! or [`ThreadRegistry::dispatcher`](crate::ThreadRegistry::dispatcher) so that
//! related work shares a thread.

/// Entity managers and world bookkeeping.
pub const MANAGERS: &str = "Managers thread";

/// AI modules.
pub const AI: &str = "AIs thread";

/// Context calculations (queries, pathing, sensing).
pub const CONTEXT: &str = "Context thread";

/// World simulation.
pub const WORLD: &str = "World thread";

/// Default home of systems.
pub const SYSTEMS: &str = "Systems thread";

/// Background services.
pub const SERVICES: &str = "Services";

/// All well-known names.
pub const ALL: [&str; 6] = [MANAGERS, AI, CONTEXT, WORLD, SYSTEMS, SERVICES];
