//! # Cadence Demo
//!
//! Headless run of two systems contending on one component:
//!
//! - `Writer` on the "World thread" opens the write lock, bumps the value
//!   and holds the lock for a few milliseconds before closing.
//! - `Reader` on the "Systems thread" reads the same component and checks
//!   it never observes a value older than the last one it saw.
//!
//! A background task on "Services" reports the value once per second.
//!
//! ```bash
//! cadence_demo                  # defaults, runs 3 seconds
//! cadence_demo cadence.toml 10  # config file, runs 10 seconds
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cadence::ecs::{
    Component, ComponentData, ComponentHandle, ComponentType, EcsError, EcsResult,
    EntityDynamicList, System, SystemContext,
};
use cadence::threads::names;
use cadence::{init_logging, Runtime, RuntimeConfig, RuntimeError};

#[derive(Clone, Default)]
struct Counter(u64);

impl ComponentData for Counter {}

struct Writer {
    hold: Duration,
}

impl System for Writer {
    fn thread(&self) -> &str {
        names::WORLD
    }

    fn delay_ms(&self) -> Option<u64> {
        Some(20)
    }

    fn update(&mut self, ctx: &SystemContext, _dt: f64) -> EcsResult<()> {
        for counter in ctx.entities().components_list::<Counter>() {
            let mut value = counter.open_write(ctx.token());
            value.0 += 1;
            thread::sleep(self.hold);
            counter.close_write(ctx.token(), value)?;
        }
        Ok(())
    }
}

struct Reader {
    list: Option<EntityDynamicList>,
    last_seen: u64,
    reads: Arc<AtomicU64>,
}

impl System for Reader {
    fn delay_ms(&self) -> Option<u64> {
        Some(5)
    }

    fn initialize(&mut self, ctx: &SystemContext) -> EcsResult<()> {
        self.list = Some(ctx.dynamic_list(&[ComponentType::of::<Counter>()])?);
        Ok(())
    }

    fn update(&mut self, ctx: &SystemContext, _dt: f64) -> EcsResult<()> {
        let Some(list) = &self.list else {
            return Ok(());
        };
        for handler in list.iter() {
            if let Some(counter) = handler.get_component::<Counter>() {
                let value = counter.read(ctx.token()).0;
                if value < self.last_seen {
                    return Err(EcsError::System(format!(
                        "value went back from {} to {value}",
                        self.last_seen
                    )));
                }
                self.last_seen = value;
                self.reads.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

fn main() -> Result<(), RuntimeError> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    let seconds: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(3);
    init_logging(&config.log_filter)?;

    let runtime = Runtime::new(config)?;
    let world = runtime.main_world();

    let counter = Component::new(Counter(0));
    world.create_entity([Arc::clone(&counter) as ComponentHandle])?;

    let reads = Arc::new(AtomicU64::new(0));
    world.systems().add_system(Writer {
        hold: Duration::from_millis(5),
    })?;
    world.systems().add_system(Reader {
        list: None,
        last_seen: 0,
        reads: Arc::clone(&reads),
    })?;

    runtime.start()?;
    let services = runtime.dispatcher(names::SERVICES)?;

    for second in 1..=seconds {
        thread::sleep(Duration::from_secs(1));
        let snapshot = Arc::clone(&counter);
        let value = services.sync(move || snapshot.read_shared().0)?;
        tracing::info!(second, value, reads = reads.load(Ordering::Relaxed), "progress");
    }

    for health in runtime.health_report() {
        println!(
            "{:<28} running={:<5} load={:>5.1}% ticks={:<6} late={:<4} responding={}",
            health.name,
            health.running,
            health.load_percent,
            health.stats.tick_count,
            health.stats.late_ticks,
            health.responding,
        );
    }

    runtime.stop()?;
    runtime.shutdown();
    Ok(())
}
