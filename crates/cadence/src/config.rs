//! # Runtime Configuration
//!
//! TOML file loaded once at startup. Every field has a default, so an empty
//! file (or no file) is a valid configuration.
//!
//! ```toml
//! default_delay_ms = 50
//! important_drain_limit = 100
//! task_pool_capacity = 64
//! liveness_threshold_ms = 3000
//! log_filter = "info,cadence_async=debug"
//!
//! [[threads]]
//! name = "Services"
//! delay_ms = 10
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cadence_async::{
    RegistryOptions, DEFAULT_DELAY_MS, DEFAULT_IMPORTANT_LIMIT, DEFAULT_LIVENESS_THRESHOLD,
    DEFAULT_POOL_CAPACITY, MAIN_THREAD,
};
use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The TOML is malformed or has unknown fields.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parse but are not usable.
    #[error("invalid configuration value: {0}")]
    Invalid(String),
}

/// A thread created at startup.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThreadConfig {
    /// Thread name.
    pub name: String,
    /// Loop delay; the runtime default when absent.
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

/// Tunables of a [`Runtime`](crate::Runtime).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Cadence used when a thread or system names none.
    pub default_delay_ms: u64,
    /// Per-tick cap of each important delegate queue.
    pub important_drain_limit: usize,
    /// Idle tasks retained per result type.
    pub task_pool_capacity: usize,
    /// Silence after which a thread is reported as not responding.
    pub liveness_threshold_ms: u64,
    /// Filter used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Threads created at startup.
    pub threads: Vec<ThreadConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: DEFAULT_DELAY_MS,
            important_drain_limit: DEFAULT_IMPORTANT_LIMIT,
            task_pool_capacity: DEFAULT_POOL_CAPACITY,
            liveness_threshold_ms: u64::try_from(DEFAULT_LIVENESS_THRESHOLD.as_millis()).unwrap_or(u64::MAX),
            log_filter: "info".to_string(),
            threads: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`RuntimeConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks values the type system cannot.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_delay_ms == 0 {
            return Err(ConfigError::Invalid("default_delay_ms must be positive".into()));
        }
        if self.important_drain_limit == 0 {
            return Err(ConfigError::Invalid("important_drain_limit must be positive".into()));
        }
        let mut seen = HashSet::new();
        for thread in &self.threads {
            if thread.name.trim().is_empty() {
                return Err(ConfigError::Invalid("thread name must not be empty".into()));
            }
            if thread.name == MAIN_THREAD {
                return Err(ConfigError::Invalid(format!(
                    "thread name {MAIN_THREAD:?} is reserved"
                )));
            }
            if thread.delay_ms == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "thread {:?} needs a positive delay_ms",
                    thread.name
                )));
            }
            if !seen.insert(thread.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "thread {:?} is listed twice",
                    thread.name
                )));
            }
        }
        Ok(())
    }

    /// Options for the thread registry.
    #[must_use]
    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            default_delay: Duration::from_millis(self.default_delay_ms),
            important_limit: self.important_drain_limit,
            task_pool_capacity: self.task_pool_capacity,
        }
    }

    /// Liveness threshold as a duration.
    #[must_use]
    pub const fn liveness_threshold(&self) -> Duration {
        Duration::from_millis(self.liveness_threshold_ms)
    }

    /// Delay of a configured thread.
    #[must_use]
    pub fn thread_delay(&self, thread: &ThreadConfig) -> Duration {
        Duration::from_millis(thread.delay_ms.unwrap_or(self.default_delay_ms))
    }
}
