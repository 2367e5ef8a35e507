//! Integration test for the runtime: systems on separate native threads
//! contending on one component, task hand-off between threads, and
//! configuration loaded from a file.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use cadence::ecs::{
    Component, ComponentData, ComponentHandle, EcsResult, System, SystemContext, SystemState,
    WorldId,
};
use cadence::threads::{names, TaskError, MAIN_THREAD};
use cadence::{Runtime, RuntimeConfig};

#[derive(Clone, Default, Debug, PartialEq)]
struct X(i64);

impl ComponentData for X {}

/// Opens a write, sets 5, holds the lock 10 ms, closes. Once.
struct WriterA {
    x: Arc<Component<X>>,
    opened: Arc<Barrier>,
    done: bool,
}

impl System for WriterA {
    fn thread(&self) -> &str {
        "Writer thread"
    }

    fn delay_ms(&self) -> Option<u64> {
        Some(1)
    }

    fn update(&mut self, ctx: &SystemContext, _dt: f64) -> EcsResult<()> {
        if self.done {
            return Ok(());
        }
        self.done = true;
        let mut value = self.x.open_write(ctx.token());
        self.opened.wait();
        value.0 = 5;
        thread::sleep(Duration::from_millis(10));
        self.x.close_write(ctx.token(), value)?;
        Ok(())
    }
}

/// Reads once after the writer opened.
struct ReaderB {
    x: Arc<Component<X>>,
    opened: Arc<Barrier>,
    seen: Arc<parking_lot::Mutex<Option<X>>>,
}

impl System for ReaderB {
    fn thread(&self) -> &str {
        "Reader thread"
    }

    fn delay_ms(&self) -> Option<u64> {
        Some(1)
    }

    fn update(&mut self, ctx: &SystemContext, _dt: f64) -> EcsResult<()> {
        if self.seen.lock().is_some() {
            return Ok(());
        }
        self.opened.wait();
        let value = self.x.read(ctx.token());
        *self.seen.lock() = Some(value);
        Ok(())
    }
}

fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

#[test]
fn test_reader_system_sees_committed_write() {
    let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    let world = runtime.main_world();

    let x = Component::new(X(0));
    world
        .create_entity([Arc::clone(&x) as ComponentHandle])
        .unwrap();

    let opened = Arc::new(Barrier::new(2));
    let seen = Arc::new(parking_lot::Mutex::new(None));
    world
        .systems()
        .add_system(WriterA {
            x: Arc::clone(&x),
            opened: Arc::clone(&opened),
            done: false,
        })
        .unwrap();
    world
        .systems()
        .add_system(ReaderB {
            x: Arc::clone(&x),
            opened,
            seen: Arc::clone(&seen),
        })
        .unwrap();

    runtime.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || seen.lock().is_some()));
    assert_eq!(*seen.lock(), Some(X(5)));
    assert!(!x.is_locked());

    let names = runtime.threads().thread_names();
    assert!(names.contains(&"Writer thread@1ms".to_string()));
    assert!(names.contains(&"Reader thread@1ms".to_string()));
    runtime.stop().unwrap();
}

#[test]
fn test_task_aborted_before_drain_is_canceled() {
    let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    runtime.start().unwrap();
    let services = runtime.dispatcher(names::SERVICES).unwrap();

    // Occupy the services thread so the next task stays queued.
    let release = Arc::new(AtomicBool::new(false));
    let blocker = {
        let release = Arc::clone(&release);
        services
            .async_run(
                move || {
                    while !release.load(Ordering::Acquire) {
                        thread::sleep(Duration::from_millis(1));
                    }
                },
                cadence::threads::Priority::Important,
            )
            .unwrap()
    };

    let ran = Arc::new(AtomicBool::new(false));
    let task = {
        let ran = Arc::clone(&ran);
        services
            .async_run(
                move || {
                    ran.store(true, Ordering::SeqCst);
                    7
                },
                cadence::threads::Priority::Important,
            )
            .unwrap()
    };
    task.abort();
    release.store(true, Ordering::Release);

    assert_eq!(blocker.result(), Ok(()));
    assert_eq!(task.result(), Err(TaskError::Canceled));
    assert_eq!(task.clone().result(), Err(TaskError::Canceled));
    assert!(!ran.load(Ordering::SeqCst));

    // The thread keeps serving after the canceled task.
    assert_eq!(services.sync(|| 6 * 7), Ok(42));
    runtime.stop().unwrap();
}

#[test]
fn test_sync_call_marshals_to_owner_thread() {
    let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    runtime.start().unwrap();
    let services = runtime.dispatcher(names::SERVICES).unwrap();

    let caller = thread::current().id();
    let executed_on = services.sync(|| thread::current().id()).unwrap();
    assert_ne!(executed_on, caller);
    assert_eq!(services.queue().owner_thread(), Some(executed_on));

    let panicked = services.sync(|| -> u32 { panic!("service failure") });
    assert!(matches!(panicked, Err(TaskError::Panicked(_))));
    runtime.stop().unwrap();
}

struct MainCounter {
    updates: Arc<AtomicUsize>,
}

impl System for MainCounter {
    fn thread(&self) -> &str {
        MAIN_THREAD
    }

    fn update(&mut self, _ctx: &SystemContext, _dt: f64) -> EcsResult<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_main_thread_systems_follow_world_state() {
    let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    let world = runtime.worlds().create_world(WorldId::new(7)).unwrap();
    let updates = Arc::new(AtomicUsize::new(0));
    let system = world
        .systems()
        .add_system(MainCounter {
            updates: Arc::clone(&updates),
        })
        .unwrap();

    runtime.tick_main(0.016);
    world.set_enabled(false);
    runtime.tick_main(0.016);
    world.set_enabled(true);
    runtime.tick_main(0.016);
    assert_eq!(updates.load(Ordering::SeqCst), 2);

    runtime.worlds().remove_world(WorldId::new(7)).unwrap();
    assert_eq!(system.state(), SystemState::Disposed);
    runtime.tick_main(0.016);
    assert_eq!(updates.load(Ordering::SeqCst), 2);
    assert_eq!(runtime.main_stats().ticks, 4);
}

#[test]
fn test_config_file_round_trip() {
    let path = std::env::temp_dir().join(format!("cadence-test-{}.toml", std::process::id()));
    std::fs::write(
        &path,
        "default_delay_ms = 15\n\n[[threads]]\nname = \"Context thread\"\n",
    )
    .unwrap();

    let config = RuntimeConfig::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    let runtime = Runtime::new(config).unwrap();
    let context = runtime.threads().get_thread(names::CONTEXT).unwrap();
    assert_eq!(context.delay(), Duration::from_millis(15));

    runtime.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || context.stats().tick_count > 0));
    let report = runtime.health_report();
    assert!(report.iter().all(|h| h.responding));
    runtime.stop().unwrap();
}

#[test]
fn test_main_dispatcher_runs_on_host_thread() {
    let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    runtime.start().unwrap();
    let main = runtime.dispatcher(MAIN_THREAD).unwrap();
    assert!(runtime.threads().get_thread(MAIN_THREAD).is_none());

    let caller = thread::spawn(move || main.sync(|| thread::current().id()));
    let host = thread::current().id();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !caller.is_finished() && Instant::now() < deadline {
        runtime.tick_main(0.001);
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(caller.join().unwrap(), Ok(host));
    runtime.stop().unwrap();
}

/// Names neither thread nor cadence.
struct Idle;

impl System for Idle {
    fn update(&mut self, _ctx: &SystemContext, _dt: f64) -> EcsResult<()> {
        Ok(())
    }
}

#[test]
fn test_system_without_delay_uses_configured_default() {
    let config = RuntimeConfig {
        default_delay_ms: 15,
        ..RuntimeConfig::default()
    };
    let runtime = Runtime::new(config).unwrap();
    runtime.main_world().systems().add_system(Idle).unwrap();

    let thread = runtime
        .threads()
        .get_thread(&format!("{}@15ms", names::SYSTEMS))
        .unwrap();
    assert_eq!(thread.delay(), Duration::from_millis(15));
}
