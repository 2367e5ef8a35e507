//! # Cadence Async Core
//!
//! Named native threads running fixed-cadence loops, and the plumbing to
//! move work between them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────── ThreadRegistry ────────────────────────────┐
//! │                                                                        │
//! │  NativeThread "Systems thread@50ms"     NativeThread "Services"        │
//! │   ├─ Scheduler (entry points)            ├─ DelegateQueue              │
//! │   └─ ...                                 └─ ...                        │
//! │                                                                        │
//! └────────────────────────────────────────────────────────────────────────┘
//!        ▲                                         ▲
//!        │ register_entry_point                    │ sync / async_run
//!  SystemsDispatcher                          TaskDispatcher ──> Task<T>
//! ```
//!
//! - [`NativeThread`]: dedicated OS thread, update then late-update on every
//!   participant each iteration, panics isolated per participant.
//! - [`ThreadRegistry`]: owns threads by name, starts and stops them together,
//!   reports liveness.
//! - [`SystemsDispatcher`]: routes delta-time ticks to entry points per
//!   `(thread name, cadence)` pair.
//! - [`DelegateQueue`]: best-effort and bounded-drain queues of callables.
//! - [`TaskDispatcher`] / [`Task`]: pooled, typed cross-thread computations.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cadence_async::{names, ThreadRegistry};
//!
//! let registry = Arc::new(ThreadRegistry::new());
//! registry.execute_all()?;
//!
//! let services = registry.dispatcher(names::SERVICES)?;
//! let answer = services.sync(|| 6 * 7).expect("task failed");
//! assert_eq!(answer, 42);
//!
//! registry.terminate_all()?;
//! # Ok::<(), cadence_async::AsyncError>(())
//! ```

#![deny(unsafe_code)]

pub mod call;
pub mod delegate;
pub mod dispatcher;
pub mod error;
pub mod isolate;
pub mod names;
pub mod native_thread;
pub mod registry;
pub mod scheduler;
pub mod task;

pub use call::{AsyncCall, CallHandle};
pub use delegate::{Delegate, DelegateQueue, DrainStats, Priority, DEFAULT_IMPORTANT_LIMIT};
pub use dispatcher::TaskDispatcher;
pub use error::{AsyncError, AsyncResult, TaskError, TaskResult};
pub use isolate::run_isolated;
pub use native_thread::{NativeThread, ThreadStats};
pub use registry::{RegistryOptions, ThreadHealth, ThreadRegistry, DEFAULT_LIVENESS_THRESHOLD};
pub use scheduler::{EntryPoint, Scheduler, SystemsDispatcher, DEFAULT_DELAY_MS, MAIN_THREAD};
pub use task::{PoolStats, Task, TaskPool, DEFAULT_POOL_CAPACITY};
