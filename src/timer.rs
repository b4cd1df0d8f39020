//! Timer providers driving the periodic tasks.
//!
//! A [`TimerProvider`] is the only source of time the reporter knows about.
//! [`ThreadTimers`] runs callbacks on a background thread and is the default;
//! [`ManualTimers`] only moves forward when told to, which makes scheduling
//! fully deterministic in tests.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// A one-shot callback scheduled on a timer provider.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Opaque handle identifying one armed timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Wraps a provider specific timer id.
    pub fn from_raw(id: u64) -> TimerHandle {
        TimerHandle(id)
    }

    /// Returns the provider specific timer id.
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

/// Schedules and cancels one-shot callbacks.
pub trait TimerProvider: Send + Sync + 'static {
    /// Runs `callback` once after `delay`.
    fn set_timer(&self, callback: TimerCallback, delay: Duration) -> TimerHandle;

    /// Cancels a pending timer. Unknown or already fired handles are ignored.
    fn cancel_timer(&self, handle: TimerHandle);
}

lazy_static::lazy_static! {
    static ref HOST_TIMERS: Arc<ThreadTimers> = Arc::new(ThreadTimers::new());
}

#[derive(Default)]
struct TimerQueue {
    pending: BTreeMap<(Instant, u64), TimerCallback>,
    deadlines: HashMap<u64, Instant>,
    shutdown: bool,
}

/// Runs timer callbacks on a dedicated background thread.
///
/// Callbacks run one at a time in deadline order and may arm new timers.
/// A callback that blocks delays every other timer of this provider.
pub struct ThreadTimers {
    queue: Arc<(Mutex<TimerQueue>, Condvar)>,
    next_id: AtomicU64,
    worker: Option<JoinHandle<()>>,
    worker_id: Option<ThreadId>,
}

impl ThreadTimers {
    /// Spawns a new timer thread.
    pub fn new() -> ThreadTimers {
        let queue = Arc::new((Mutex::new(TimerQueue::default()), Condvar::new()));
        let worker_queue = queue.clone();
        let worker = thread::Builder::new()
            .name("process-reporter-timers".into())
            .spawn(move || run_timer_loop(&worker_queue))
            .map_err(|err| log::warn!("failed to spawn timer thread: {err}"))
            .ok();
        let worker_id = worker.as_ref().map(|handle| handle.thread().id());

        ThreadTimers {
            queue,
            next_id: AtomicU64::new(1),
            worker,
            worker_id,
        }
    }

    /// The process-wide provider used when none is configured.
    pub fn global() -> Arc<ThreadTimers> {
        HOST_TIMERS.clone()
    }

    /// Number of timers waiting to fire.
    pub fn pending_count(&self) -> usize {
        lock(&self.queue.0).pending.len()
    }
}

/// Delays past this are treated as "never" by [`ThreadTimers`].
const MAX_TIMER_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay.min(MAX_TIMER_DELAY))
        .or_else(|| now.checked_add(MAX_TIMER_DELAY / 1000))
        .unwrap_or(now)
}

impl Default for ThreadTimers {
    fn default() -> Self {
        Self::new()
    }
}

fn run_timer_loop(queue: &(Mutex<TimerQueue>, Condvar)) {
    let (lock_, cvar) = queue;
    let mut guard = lock(lock_);
    loop {
        if guard.shutdown {
            return;
        }
        let now = Instant::now();
        let next = guard.pending.keys().next().copied();
        match next {
            None => {
                guard = cvar.wait(guard).unwrap_or_else(PoisonError::into_inner);
            }
            Some((deadline, id)) if deadline <= now => {
                let callback = guard.pending.remove(&(deadline, id));
                guard.deadlines.remove(&id);
                drop(guard);
                if let Some(callback) = callback {
                    callback();
                }
                guard = lock(lock_);
            }
            Some((deadline, _)) => {
                guard = cvar
                    .wait_timeout(guard, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        }
    }
}

impl TimerProvider for ThreadTimers {
    fn set_timer(&self, callback: TimerCallback, delay: Duration) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = deadline_after(Instant::now(), delay);
        let (lock_, cvar) = self.queue.as_ref();
        let mut queue = lock(lock_);
        queue.pending.insert((deadline, id), callback);
        queue.deadlines.insert(id, deadline);
        cvar.notify_one();
        TimerHandle(id)
    }

    fn cancel_timer(&self, handle: TimerHandle) {
        let (lock_, cvar) = self.queue.as_ref();
        let mut queue = lock(lock_);
        let cancelled = queue
            .deadlines
            .remove(&handle.0)
            .and_then(|deadline| queue.pending.remove(&(deadline, handle.0)));
        drop(queue);
        if cancelled.is_some() {
            cvar.notify_one();
        }
    }
}

impl Drop for ThreadTimers {
    fn drop(&mut self) {
        let (lock_, cvar) = self.queue.as_ref();
        let pending = {
            let mut queue = lock(lock_);
            queue.shutdown = true;
            queue.deadlines.clear();
            std::mem::take(&mut queue.pending)
        };
        cvar.notify_all();
        drop(pending);

        // the last reference may be released by a callback on the worker itself
        if self.worker_id != Some(thread::current().id()) {
            if let Some(worker) = self.worker.take() {
                worker.join().ok();
            }
        }
    }
}

impl fmt::Debug for ThreadTimers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadTimers")
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_id: u64,
    pending: BTreeMap<(Duration, u64), TimerCallback>,
    deadlines: HashMap<u64, Duration>,
}

/// A timer provider whose clock only moves on [`advance`](Self::advance).
///
/// Callbacks run synchronously on the thread calling `advance`, in deadline
/// order; timers armed by a callback fire within the same call if their
/// deadline is still inside the advanced window.
#[derive(Default)]
pub struct ManualTimers {
    state: Mutex<ManualState>,
}

impl ManualTimers {
    /// Creates a provider with its clock at zero.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Arc<ManualTimers> {
        Arc::new(ManualTimers::default())
    }

    /// Time elapsed on this clock.
    pub fn now(&self) -> Duration {
        lock(&self.state).now
    }

    /// Number of armed timers.
    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Moves the clock forward, firing every timer that comes due.
    pub fn advance(&self, by: Duration) {
        let target = lock(&self.state).now.saturating_add(by);
        loop {
            let callback = {
                let mut state = lock(&self.state);
                let due = state
                    .pending
                    .keys()
                    .next()
                    .copied()
                    .filter(|(deadline, _)| *deadline <= target);
                match due {
                    Some((deadline, id)) => {
                        state.now = deadline;
                        state.deadlines.remove(&id);
                        state.pending.remove(&(deadline, id))
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };
            match callback {
                Some(callback) => callback(),
                None => break,
            }
        }
    }
}

impl TimerProvider for ManualTimers {
    fn set_timer(&self, callback: TimerCallback, delay: Duration) -> TimerHandle {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = state.next_id;
        let deadline = state.now.saturating_add(delay);
        state.pending.insert((deadline, id), callback);
        state.deadlines.insert(id, deadline);
        TimerHandle(id)
    }

    fn cancel_timer(&self, handle: TimerHandle) {
        let mut state = lock(&self.state);
        let cancelled = state
            .deadlines
            .remove(&handle.0)
            .and_then(|deadline| state.pending.remove(&(deadline, handle.0)));
        drop(state);
        drop(cancelled);
    }
}

impl fmt::Debug for ManualTimers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("ManualTimers")
            .field("now", &state.now)
            .field("pending", &state.pending.len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
