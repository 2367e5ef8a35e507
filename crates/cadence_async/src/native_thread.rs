//! # Native Thread
//!
//! A dedicated OS thread driving a fixed-delay loop over its participants.
//!
//! ## Loop
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │ for p in participants: p.update(dt)        (panic isolated)  │
//!   │ for p in participants: p.late_update(dt)   (panic isolated)  │
//!   │ record busy time / idle ratio                                │
//!   │ stop requested? ──yes──> exit                                │
//!   │ sleep max(0, delay - elapsed)                                │
//!   │ dt = time since the start of this iteration                  │
//!   └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! `terminate` is cooperative: the current iteration finishes and the loop
//! exits before its next sleep. `abort` additionally stops between two
//! participants and detaches the OS thread instead of joining it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::call::{same_call, CallHandle};
use crate::error::{AsyncError, AsyncResult};
use crate::isolate::run_isolated;

/// Loop timing of one native thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadStats {
    /// Iterations completed.
    pub tick_count: u64,
    /// Iterations whose work took longer than the configured delay.
    pub late_ticks: u64,
    /// Measured duration of the last full iteration (work plus sleep).
    pub true_delay: Duration,
    /// Work time of the last iteration.
    pub last_busy: Duration,
    /// Longest work time observed.
    pub max_busy: Duration,
    /// Fraction of the last iteration spent sleeping, in `[0, 1]`.
    pub idle_ratio: f64,
    /// End of the last iteration.
    pub last_loop: Option<Instant>,
}

impl ThreadStats {
    /// Load of the thread in percent (`100 * (1 - idle_ratio)`).
    #[must_use]
    pub fn load_percent(&self) -> f64 {
        (1.0 - self.idle_ratio) * 100.0
    }

    /// Time since the last iteration ended, if any.
    #[must_use]
    pub fn silence(&self) -> Option<Duration> {
        self.last_loop.map(|at| at.elapsed())
    }
}

/// State shared between the handle and the loop thread.
struct LoopShared {
    name: String,
    delay_us: AtomicU64,
    participants: RwLock<Vec<CallHandle>>,
    stats: Mutex<ThreadStats>,
}

impl LoopShared {
    fn delay(&self) -> Duration {
        Duration::from_micros(self.delay_us.load(Ordering::Relaxed))
    }
}

/// Per-run stop flags; a fresh pair is created by every `execute`.
#[derive(Default)]
struct Signals {
    stop: AtomicBool,
    abort: AtomicBool,
}

struct RunControl {
    signals: Arc<Signals>,
    handle: JoinHandle<()>,
}

/// Fixed-delay update loop on a dedicated OS thread.
pub struct NativeThread {
    shared: Arc<LoopShared>,
    control: Mutex<Option<RunControl>>,
    created_at: Instant,
}

impl NativeThread {
    /// Creates a stopped thread. A zero delay is raised to one millisecond.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        let thread = Self {
            shared: Arc::new(LoopShared {
                name: name.into(),
                delay_us: AtomicU64::new(0),
                participants: RwLock::new(Vec::new()),
                stats: Mutex::new(ThreadStats {
                    idle_ratio: 1.0,
                    ..ThreadStats::default()
                }),
            }),
            control: Mutex::new(None),
            created_at: Instant::now(),
        };
        thread.set_delay(delay);
        thread
    }

    /// Thread name (also the OS thread name).
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Target duration of one iteration.
    #[inline]
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.shared.delay()
    }

    /// Changes the target duration; applies from the next iteration.
    pub fn set_delay(&self, delay: Duration) {
        let micros = u64::try_from(delay.as_micros()).unwrap_or(u64::MAX).max(1_000);
        self.shared.delay_us.store(micros, Ordering::Relaxed);
    }

    /// Time since this thread object was created.
    #[must_use]
    pub fn current_time(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Appends a participant. Returns false if it is already registered.
    pub fn add_participant(&self, call: CallHandle) -> bool {
        let mut participants = self.shared.participants.write();
        if participants.iter().any(|p| same_call(p, &call)) {
            return false;
        }
        participants.push(call);
        true
    }

    /// Removes a participant. Returns false if it was not registered.
    pub fn remove_participant(&self, call: &CallHandle) -> bool {
        let mut participants = self.shared.participants.write();
        let before = participants.len();
        participants.retain(|p| !same_call(p, call));
        participants.len() != before
    }

    /// Number of registered participants.
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.shared.participants.read().len()
    }

    /// Returns true between `execute` and `terminate`/`abort`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.control.lock().is_some()
    }

    /// OS thread id of the running loop.
    #[must_use]
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.control.lock().as_ref().map(|run| run.handle.thread().id())
    }

    /// Snapshot of the loop timing.
    #[must_use]
    pub fn stats(&self) -> ThreadStats {
        *self.shared.stats.lock()
    }

    /// Spawns the OS thread and starts the loop.
    ///
    /// # Errors
    ///
    /// [`AsyncError::AlreadyRunning`] if the loop is running,
    /// [`AsyncError::Spawn`] if the OS refuses the thread.
    pub fn execute(&self) -> AsyncResult<()> {
        let mut control = self.control.lock();
        if control.is_some() {
            return Err(AsyncError::AlreadyRunning(self.shared.name.clone()));
        }

        let signals = Arc::new(Signals::default());
        let handle = {
            let shared = Arc::clone(&self.shared);
            let signals = Arc::clone(&signals);
            thread::Builder::new()
                .name(self.shared.name.clone())
                .spawn(move || run_loop(&shared, &signals))
                .map_err(|e| AsyncError::Spawn {
                    name: self.shared.name.clone(),
                    reason: e.to_string(),
                })?
        };

        tracing::info!(thread = %self.shared.name, delay = ?self.delay(), "native thread started");
        *control = Some(RunControl { signals, handle });
        Ok(())
    }

    /// Cooperative stop: the current iteration finishes, then the loop exits.
    ///
    /// Joins the OS thread unless called from inside the loop itself.
    ///
    /// # Errors
    ///
    /// [`AsyncError::NotRunning`] if the loop is not running.
    pub fn terminate(&self) -> AsyncResult<()> {
        let run = self
            .control
            .lock()
            .take()
            .ok_or_else(|| AsyncError::NotRunning(self.shared.name.clone()))?;

        run.signals.stop.store(true, Ordering::Release);
        run.handle.thread().unpark();
        if run.handle.thread().id() != thread::current().id() && run.handle.join().is_err() {
            tracing::error!(thread = %self.shared.name, "native thread loop panicked");
        }
        tracing::info!(thread = %self.shared.name, "native thread terminated");
        Ok(())
    }

    /// Stops the loop at the next participant boundary without waiting.
    ///
    /// The OS thread is detached; a participant that never returns keeps it
    /// alive.
    ///
    /// # Errors
    ///
    /// [`AsyncError::NotRunning`] if the loop is not running.
    pub fn abort(&self) -> AsyncResult<()> {
        let run = self
            .control
            .lock()
            .take()
            .ok_or_else(|| AsyncError::NotRunning(self.shared.name.clone()))?;

        run.signals.abort.store(true, Ordering::Release);
        run.signals.stop.store(true, Ordering::Release);
        run.handle.thread().unpark();
        tracing::warn!(thread = %self.shared.name, "native thread aborted");
        Ok(())
    }
}

impl Drop for NativeThread {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.terminate();
        }
    }
}

impl std::fmt::Debug for NativeThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeThread")
            .field("name", &self.shared.name)
            .field("delay", &self.delay())
            .field("participants", &self.participant_count())
            .field("running", &self.is_running())
            .finish()
    }
}

fn run_loop(shared: &LoopShared, signals: &Signals) {
    let stopped = || signals.stop.load(Ordering::Acquire);
    let aborted = || signals.abort.load(Ordering::Acquire);

    let mut delta = shared.delay();
    while !stopped() {
        let start = Instant::now();
        // Snapshot so participants may register or unregister mid-tick.
        let participants: Vec<CallHandle> = shared.participants.read().clone();

        for participant in &participants {
            if aborted() {
                return;
            }
            if participant.update_enabled() {
                run_isolated(&shared.name, || participant.update(delta));
            }
        }
        for participant in &participants {
            if aborted() {
                return;
            }
            if participant.late_update_enabled() {
                run_isolated(&shared.name, || participant.late_update(delta));
            }
        }
        drop(participants);

        let busy = start.elapsed();
        let delay = shared.delay();
        let late = busy > delay;
        if late {
            tracing::warn!(thread = %shared.name, ?busy, ?delay, "late tick");
        }

        if stopped() {
            record(shared, busy, delay, late, busy);
            break;
        }

        let deadline = start + delay;
        loop {
            let now = Instant::now();
            if now >= deadline || stopped() {
                break;
            }
            thread::park_timeout(deadline - now);
        }

        delta = start.elapsed();
        record(shared, busy, delay, late, delta);
    }
}

fn record(shared: &LoopShared, busy: Duration, delay: Duration, late: bool, true_delay: Duration) {
    let mut stats = shared.stats.lock();
    stats.tick_count += 1;
    if late {
        stats.late_ticks += 1;
    }
    stats.last_busy = busy;
    stats.max_busy = stats.max_busy.max(busy);
    stats.idle_ratio = (1.0 - busy.as_secs_f64() / delay.as_secs_f64()).clamp(0.0, 1.0);
    stats.true_delay = true_delay;
    stats.last_loop = Some(Instant::now());
}
