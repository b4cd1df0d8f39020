//! Scheduler lag measurement.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often the monitor thread checks in.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Weight of the newest measurement in the smoothed lag.
const SMOOTHING_FACTOR: f64 = 1.0 / 3.0;

struct Worker {
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct MonitorState {
    users: usize,
    worker: Option<Worker>,
}

/// Measures how late the OS scheduler wakes a sleeping thread.
///
/// A background thread sleeps for the check interval and records by how
/// much it overslept; the reported lag is an exponentially smoothed average
/// of those measurements. Under CPU saturation the lag grows.
///
/// The thread runs while at least one user has called [`start`](Self::start)
/// without a matching [`stop`](Self::stop).
pub struct LagMonitor {
    check_interval: Duration,
    lag_bits: Arc<AtomicU64>,
    state: Mutex<MonitorState>,
}

impl LagMonitor {
    /// Creates a stopped monitor with the default check interval.
    pub fn new() -> LagMonitor {
        LagMonitor::with_check_interval(DEFAULT_CHECK_INTERVAL)
    }

    /// Creates a stopped monitor with a custom check interval.
    pub fn with_check_interval(check_interval: Duration) -> LagMonitor {
        LagMonitor {
            check_interval,
            lag_bits: Arc::new(AtomicU64::new(0f64.to_bits())),
            state: Mutex::new(MonitorState::default()),
        }
    }

    /// The smoothed lag in milliseconds; zero until the first measurement.
    pub fn lag_ms(&self) -> f64 {
        f64::from_bits(self.lag_bits.load(Ordering::Relaxed))
    }

    /// Whether the monitor thread is running.
    pub fn is_running(&self) -> bool {
        self.lock().worker.is_some()
    }

    /// Registers a user, spawning the monitor thread for the first one.
    pub fn start(&self) {
        let mut state = self.lock();
        state.users += 1;
        if state.worker.is_some() {
            return;
        }

        let shutdown = Arc::new((Mutex::new(false), Condvar::new()));
        let worker_shutdown = shutdown.clone();
        let lag_bits = self.lag_bits.clone();
        let interval = self.check_interval;
        let spawned = thread::Builder::new()
            .name("process-reporter-lag".into())
            .spawn(move || measure_lag(&worker_shutdown, &lag_bits, interval));

        match spawned {
            Ok(handle) => state.worker = Some(Worker { shutdown, handle }),
            Err(err) => log::warn!("failed to spawn lag monitor thread: {err}"),
        }
    }

    /// Releases a user, stopping the thread when none are left.
    pub fn stop(&self) {
        let worker = {
            let mut state = self.lock();
            state.users = state.users.saturating_sub(1);
            if state.users > 0 {
                return;
            }
            state.worker.take()
        };
        if let Some(worker) = worker {
            shutdown_worker(worker);
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn measure_lag(shutdown: &(Mutex<bool>, Condvar), lag_bits: &AtomicU64, interval: Duration) {
    let (lock, cvar) = shutdown;
    let mut stopped = lock.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
        let started = Instant::now();
        stopped = cvar
            .wait_timeout_while(stopped, interval, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner)
            .0;
        if *stopped {
            return;
        }

        let lag = started.elapsed().saturating_sub(interval).as_secs_f64() * 1000.0;
        let current = f64::from_bits(lag_bits.load(Ordering::Relaxed));
        let smoothed = SMOOTHING_FACTOR * lag + (1.0 - SMOOTHING_FACTOR) * current;
        lag_bits.store(smoothed.to_bits(), Ordering::Relaxed);
    }
}

fn shutdown_worker(worker: Worker) {
    let (lock, cvar) = worker.shutdown.as_ref();
    *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
    cvar.notify_one();
    worker.handle.join().ok();
}

impl Default for LagMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LagMonitor {
    fn drop(&mut self) {
        let worker = self.lock().worker.take();
        if let Some(worker) = worker {
            shutdown_worker(worker);
        }
    }
}

impl fmt::Debug for LagMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LagMonitor")
            .field("check_interval", &self.check_interval)
            .field("lag_ms", &self.lag_ms())
            .field("running", &self.is_running())
            .finish()
    }
}
