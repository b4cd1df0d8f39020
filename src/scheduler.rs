//! Self-rescheduling periodic tasks.
//!
//! Each task arms a one-shot timer, runs its job when the timer fires and
//! only then arms the next timer, `interval` after the job completed. Runs of
//! one task therefore never overlap, at the cost of drifting by the job's run
//! time every cycle.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::protocol::Family;
use crate::timer::{TimerHandle, TimerProvider};

/// The job a task runs on every firing.
pub(crate) type TaskJob = Arc<dyn Fn() + Send + Sync + 'static>;

#[derive(Default)]
struct TaskState {
    handle: Option<TimerHandle>,
    job: Option<TaskJob>,
}

/// A cancellable repeating task for one metric family.
pub(crate) struct PeriodicTask {
    family: Family,
    interval: Duration,
    timers: Arc<dyn TimerProvider>,
    state: Mutex<TaskState>,
}

impl PeriodicTask {
    pub(crate) fn new(
        family: Family,
        interval: Duration,
        timers: Arc<dyn TimerProvider>,
    ) -> Arc<PeriodicTask> {
        Arc::new(PeriodicTask {
            family,
            interval,
            timers,
            state: Mutex::new(TaskState::default()),
        })
    }

    pub(crate) fn family(&self) -> Family {
        self.family
    }

    /// Whether a timer is currently pending for this task.
    pub(crate) fn is_armed(&self) -> bool {
        self.lock().handle.is_some()
    }

    /// Starts the task. Starting a running task does nothing.
    pub(crate) fn start(self: &Arc<Self>, job: TaskJob) {
        let mut state = self.lock();
        if state.job.is_some() {
            return;
        }
        state.job = Some(job);
        self.arm(&mut state);
        log::debug!("{} task armed every {:?}", self.family, self.interval);
    }

    /// Cancels the pending timer and disarms the task.
    ///
    /// A run that is already executing completes but does not re-arm.
    pub(crate) fn stop(&self) {
        let handle = {
            let mut state = self.lock();
            state.job = None;
            state.handle.take()
        };
        if let Some(handle) = handle {
            self.timers.cancel_timer(handle);
            log::debug!("{} task cancelled", self.family);
        }
    }

    fn arm(self: &Arc<Self>, state: &mut TaskState) {
        let task = Arc::downgrade(self);
        let handle = self.timers.set_timer(
            Box::new(move || {
                if let Some(task) = task.upgrade() {
                    task.fire();
                }
            }),
            self.interval,
        );
        state.handle = Some(handle);
    }

    fn fire(self: &Arc<Self>) {
        let job = {
            let mut state = self.lock();
            state.handle = None;
            match state.job {
                Some(ref job) => job.clone(),
                None => return,
            }
        };

        job();

        let mut state = self.lock();
        // stopped while the job ran
        if state.job.is_some() && state.handle.is_none() {
            self.arm(&mut state);
        }
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PeriodicTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicTask")
            .field("family", &self.family)
            .field("interval", &self.interval)
            .field("armed", &self.is_armed())
            .finish()
    }
}

/// Owns one periodic task per enabled family.
#[derive(Debug)]
pub(crate) struct Scheduler {
    tasks: Vec<Arc<PeriodicTask>>,
}

impl Scheduler {
    /// Creates disarmed tasks for the given `(family, interval)` pairs.
    pub(crate) fn new(
        timers: Arc<dyn TimerProvider>,
        families: impl IntoIterator<Item = (Family, Duration)>,
    ) -> Scheduler {
        Scheduler {
            tasks: families
                .into_iter()
                .map(|(family, interval)| PeriodicTask::new(family, interval, timers.clone()))
                .collect(),
        }
    }

    /// Starts every task, asking `job_for` for the job of each family.
    pub(crate) fn start_all<F>(&self, mut job_for: F)
    where
        F: FnMut(Family) -> TaskJob,
    {
        for task in &self.tasks {
            task.start(job_for(task.family()));
        }
    }

    /// Stops every task. Safe to call repeatedly.
    pub(crate) fn stop_all(&self) {
        for task in &self.tasks {
            task.stop();
        }
    }

    /// Whether the task of `family` has a pending timer.
    ///
    /// Families without a task (disabled ones) are never armed.
    pub(crate) fn is_armed(&self, family: Family) -> bool {
        self.tasks
            .iter()
            .any(|task| task.family() == family && task.is_armed())
    }

    /// Number of tasks with a pending timer.
    pub(crate) fn armed_count(&self) -> usize {
        self.tasks.iter().filter(|task| task.is_armed()).count()
    }
}
