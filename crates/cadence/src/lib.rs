//! # Cadence
//!
//! Runtime bootstrap for the cadence threading core and entity/component
//! store.
//!
//! ## Crates
//!
//! - [`cadence_async`] (re-exported as [`threads`]): named native threads,
//!   delegate queues, pooled tasks, the systems scheduler.
//! - [`cadence_ecs`] (re-exported as [`ecs`]): components, entities,
//!   worlds, systems.
//!
//! ## Example
//!
//! ```rust,no_run
//! use cadence::{init_logging, Runtime, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_toml_str(r#"
//!     [[threads]]
//!     name = "Services"
//!     delay_ms = 10
//! "#)?;
//! init_logging(&config.log_filter)?;
//!
//! let runtime = Runtime::new(config)?;
//! runtime.start()?;
//! let services = runtime.dispatcher(cadence::threads::names::SERVICES)?;
//! assert_eq!(services.sync(|| 40 + 2)?, 42);
//! runtime.shutdown();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use cadence_async as threads;
pub use cadence_ecs as ecs;

pub use config::{ConfigError, RuntimeConfig, ThreadConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{env_filter, init_logging};
pub use runtime::{MainTickStats, Runtime};
