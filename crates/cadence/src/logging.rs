//! # Logging
//!
//! Installs the process-wide `tracing` subscriber: an [`EnvFilter`] read from
//! `RUST_LOG`, falling back to the configured filter, and a `fmt` layer that
//! prints thread names so per-thread loops can be told apart.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{RuntimeError, RuntimeResult};

/// Builds the filter: `RUST_LOG` if set and valid, else `fallback`, else `info`.
#[must_use]
pub fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber.
///
/// # Errors
///
/// [`RuntimeError::Logging`] if a subscriber is already installed.
pub fn init_logging(fallback_filter: &str) -> RuntimeResult<()> {
    tracing_subscriber::registry()
        .with(env_filter(fallback_filter))
        .with(fmt::layer().with_thread_names(true).with_target(true))
        .try_init()
        .map_err(|e| RuntimeError::Logging(e.to_string()))?;
    tracing::debug!(filter = fallback_filter, "logging initialised");
    Ok(())
}
