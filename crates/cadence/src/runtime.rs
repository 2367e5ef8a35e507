//! # Runtime
//!
//! Owns every registry of the process and tears them down in order.
//!
//! ```text
//! Runtime::new(config)
//!   ├─ ThreadRegistry   (configured threads registered, stopped)
//!   ├─ SystemsDispatcher
//!   └─ WorldRegistry    (main world created)
//!
//! start()      ──> every native thread starts looping
//! tick_main(dt) ─> host-driven "main" scheduler
//! shutdown()   ──> worlds (systems disposed) then threads (joined)
//! ```

use std::sync::Arc;
use std::time::Duration;

use cadence_async::{SystemsDispatcher, TaskDispatcher, ThreadHealth, ThreadRegistry, MAIN_THREAD};
use cadence_ecs::{World, WorldRegistry};
use parking_lot::Mutex;

use crate::config::RuntimeConfig;
use crate::error::RuntimeResult;

/// Statistics of the host-driven main scheduler.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MainTickStats {
    /// Number of `tick_main` calls.
    pub ticks: u64,
    /// Entry points that panicked, summed over all ticks.
    pub failures: u64,
    /// Delta passed to the last tick, in seconds.
    pub last_delta: f64,
}

/// Process-wide threading and ECS runtime.
pub struct Runtime {
    config: RuntimeConfig,
    threads: Arc<ThreadRegistry>,
    systems: Arc<SystemsDispatcher>,
    worlds: WorldRegistry,
    main_stats: Mutex<MainTickStats>,
}

impl Runtime {
    /// Builds every registry from `config`. Threads are registered but not
    /// started. The calling thread becomes the owner of the `main` queue.
    ///
    /// # Errors
    ///
    /// An invalid configuration, or a duplicate configured thread.
    pub fn new(config: RuntimeConfig) -> RuntimeResult<Self> {
        config.validate()?;

        let threads = Arc::new(ThreadRegistry::with_options(config.registry_options()));
        for thread in &config.threads {
            threads.register_thread(&thread.name, config.thread_delay(thread))?;
        }
        // The building thread is the host that will call `tick_main`.
        let _host = threads.dispatcher(MAIN_THREAD)?.queue().claim_owner();
        let systems = Arc::new(SystemsDispatcher::new(Arc::clone(&threads)));
        let worlds = WorldRegistry::new(Arc::clone(&systems));
        let _main = worlds.main_world();

        tracing::info!(threads = threads.len(), "runtime built");
        Ok(Self {
            config,
            threads,
            systems,
            worlds,
            main_stats: Mutex::new(MainTickStats::default()),
        })
    }

    /// Starts every registered thread; threads created later start at once.
    ///
    /// # Errors
    ///
    /// The runtime is already started, or a thread failed to spawn.
    pub fn start(&self) -> RuntimeResult<()> {
        self.threads.execute_all()?;
        Ok(())
    }

    /// Cooperatively stops and joins every thread.
    ///
    /// # Errors
    ///
    /// The runtime is not started.
    pub fn stop(&self) -> RuntimeResult<()> {
        self.threads.terminate_all()?;
        Ok(())
    }

    /// Stops every thread without joining.
    ///
    /// # Errors
    ///
    /// The runtime is not started.
    pub fn abort(&self) -> RuntimeResult<()> {
        self.threads.abort_all()?;
        Ok(())
    }

    /// Returns true between `start` and `stop`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.threads.is_running()
    }

    /// Drives the `main` scheduler once. Returns the number of entry points
    /// that panicked.
    pub fn tick_main(&self, delta_seconds: f64) -> usize {
        let failures = self.systems.tick_main(delta_seconds);
        let mut stats = self.main_stats.lock();
        stats.ticks += 1;
        stats.failures += u64::try_from(failures).unwrap_or(u64::MAX);
        stats.last_delta = delta_seconds;
        failures
    }

    /// Main scheduler statistics.
    #[must_use]
    pub fn main_stats(&self) -> MainTickStats {
        *self.main_stats.lock()
    }

    /// Configuration the runtime was built with.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Thread registry.
    #[inline]
    #[must_use]
    pub fn threads(&self) -> &Arc<ThreadRegistry> {
        &self.threads
    }

    /// Scheduler of system entry points.
    #[inline]
    #[must_use]
    pub fn systems_dispatcher(&self) -> &Arc<SystemsDispatcher> {
        &self.systems
    }

    /// World registry.
    #[inline]
    #[must_use]
    pub const fn worlds(&self) -> &WorldRegistry {
        &self.worlds
    }

    /// The main world.
    #[must_use]
    pub fn main_world(&self) -> Arc<World> {
        self.worlds.main_world()
    }

    /// Task dispatcher of `thread`, creating the thread on first use. The
    /// `main` dispatcher is drained by [`Runtime::tick_main`] instead.
    ///
    /// # Errors
    ///
    /// The thread could not be created or started.
    pub fn dispatcher(&self, thread: &str) -> RuntimeResult<Arc<TaskDispatcher>> {
        Ok(self.threads.dispatcher(thread)?)
    }

    /// Liveness of every thread against the configured threshold. Threads
    /// that stopped responding are logged.
    #[must_use]
    pub fn health_report(&self) -> Vec<ThreadHealth> {
        self.health_report_with(self.config.liveness_threshold())
    }

    /// Liveness of every thread against `threshold`.
    #[must_use]
    pub fn health_report_with(&self, threshold: Duration) -> Vec<ThreadHealth> {
        let report = self.threads.health_report(threshold);
        for health in report.iter().filter(|h| !h.responding) {
            tracing::warn!(
                thread = %health.name,
                silence = ?health.stats.silence(),
                "thread not responding"
            );
        }
        report
    }

    /// Disposes every world and system, then stops and forgets every thread.
    pub fn shutdown(&self) {
        self.worlds.shutdown();
        self.threads.shutdown();
        tracing::info!("runtime shut down");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("running", &self.is_running())
            .field("threads", &self.threads.thread_names())
            .field("worlds", &self.worlds.world_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThreadConfig;
    use cadence_async::names;

    fn config_with_services() -> RuntimeConfig {
        RuntimeConfig {
            threads: vec![ThreadConfig {
                name: names::SERVICES.to_string(),
                delay_ms: Some(2),
            }],
            ..RuntimeConfig::default()
        }
    }

    #[test]
    fn test_configured_threads_registered() {
        let runtime = Runtime::new(config_with_services()).unwrap();
        assert_eq!(runtime.threads().thread_names(), vec![names::SERVICES.to_string()]);
        assert!(!runtime.is_running());
        assert_eq!(runtime.worlds().world_ids(), vec![cadence_ecs::WorldId::MAIN]);
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let runtime = Runtime::new(config_with_services()).unwrap();
        runtime.start().unwrap();
        assert!(runtime.start().is_err());
        assert!(runtime.is_running());

        let services = runtime.dispatcher(names::SERVICES).unwrap();
        assert_eq!(services.sync(|| 2 + 2).unwrap(), 4);

        runtime.stop().unwrap();
        assert!(runtime.stop().is_err());
    }

    #[test]
    fn test_main_dispatcher_inline_on_building_thread() {
        let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
        let main = runtime.dispatcher(MAIN_THREAD).unwrap();
        assert!(main.queue().is_owner_thread());
        assert_eq!(main.sync(|| std::thread::current().id()), Ok(std::thread::current().id()));
    }

    #[test]
    fn test_tick_main_stats() {
        let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
        runtime
            .systems_dispatcher()
            .register_entry_point(MAIN_THREAD, Arc::new(|_dt: f64| panic!("boom")), 0)
            .unwrap();

        assert_eq!(runtime.tick_main(0.016), 1);
        runtime.tick_main(0.020);
        let stats = runtime.main_stats();
        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.failures, 2);
        assert!((stats.last_delta - 0.020).abs() < f64::EPSILON);
    }
}
