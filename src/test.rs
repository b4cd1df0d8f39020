//! This provides testing functionality for building tests.
//!
//! **Feature:** `test` (*disabled by default*)
//!
//! If the crate has been compiled with the test support feature this module
//! becomes available and provides a sink that records what is written to it,
//! scripted host probes and a GC source that can be triggered by hand.
//!
//! # Example usage
//!
//! ```
//! use std::time::Duration;
//! use process_reporter::test::{FakeProbes, RecordingSink};
//! use process_reporter::{Family, ManualTimers, ReporterOptions};
//!
//! let sink = RecordingSink::new();
//! let timers = ManualTimers::new();
//! let probes = FakeProbes::new();
//! probes.set_handles(3);
//!
//! let options = ReporterOptions::new(sink.clone())
//!     .with_prefix("")
//!     .with_timers(timers.clone())
//!     .with_probes(probes.clone())
//!     .with_interval(Family::Handle, Duration::from_millis(10))
//!     .with_enabled(Family::Gc, false);
//! let reporter = process_reporter::create(options).unwrap();
//! reporter.bootstrap().unwrap();
//!
//! timers.advance(Duration::from_millis(10));
//! let records = sink.fetch_and_clear();
//! assert_eq!(records[0].name, "process-reporter.handles");
//! assert_eq!(records[0].value, 3.0);
//! ```

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::ProbeError;
use crate::gc::{GcHook, GcSource};
use crate::probes::HostProbes;
use crate::protocol::{MemoryUsage, MetricKind, RawGcStats};
use crate::sink::MetricSink;

/// One observation captured by a [`RecordingSink`].
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// Full metric name.
    pub name: String,
    /// Timing or gauge.
    pub kind: MetricKind,
    /// Observed value.
    pub value: f64,
}

/// Collects observations instead of sending them.
#[derive(Debug)]
pub struct RecordingSink {
    collected: Mutex<Vec<Record>>,
}

impl RecordingSink {
    /// Creates a new recording sink.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Arc<RecordingSink> {
        Arc::new(RecordingSink {
            collected: Mutex::new(vec![]),
        })
    }

    /// Fetches and clears the recorded observations.
    pub fn fetch_and_clear(&self) -> Vec<Record> {
        let mut guard = self.collected.lock().unwrap();
        std::mem::take(&mut *guard)
    }

    /// Number of recorded observations.
    pub fn len(&self) -> usize {
        self.collected.lock().unwrap().len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, kind: MetricKind, name: &str, value: f64) {
        self.collected.lock().unwrap().push(Record {
            name: name.to_owned(),
            kind,
            value,
        });
    }
}

impl MetricSink for RecordingSink {
    fn timing(&self, name: &str, value: f64) {
        self.push(MetricKind::Timing, name, value);
    }

    fn gauge(&self, name: &str, value: f64) {
        self.push(MetricKind::Gauge, name, value);
    }
}

/// Host probes returning scripted values.
///
/// Memory usage defaults to a fixed non-zero reading.
#[derive(Debug)]
pub struct FakeProbes {
    handles: AtomicUsize,
    requests: AtomicUsize,
    lag_ms: Mutex<f64>,
    memory: Mutex<MemoryUsage>,
    memory_failing: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl FakeProbes {
    /// Creates probes reporting zero handles, requests and lag.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Arc<FakeProbes> {
        Arc::new(FakeProbes {
            handles: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
            lag_ms: Mutex::new(0.0),
            memory: Mutex::new(MemoryUsage {
                rss: 64.0 * 1024.0 * 1024.0,
                heap_used: 8.0 * 1024.0 * 1024.0,
                heap_total: 16.0 * 1024.0 * 1024.0,
            }),
            memory_failing: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        })
    }

    /// Sets the active handle count.
    pub fn set_handles(&self, count: usize) {
        self.handles.store(count, Ordering::SeqCst);
    }

    /// Sets the in-flight request count.
    pub fn set_requests(&self, count: usize) {
        self.requests.store(count, Ordering::SeqCst);
    }

    /// Sets the lag in milliseconds.
    pub fn set_lag_ms(&self, lag_ms: f64) {
        *self.lag_ms.lock().unwrap() = lag_ms;
    }

    /// Sets the memory reading returned while not failing.
    pub fn set_memory(&self, usage: MemoryUsage) {
        *self.memory.lock().unwrap() = usage;
    }

    /// The memory reading returned while not failing.
    pub fn memory(&self) -> MemoryUsage {
        *self.memory.lock().unwrap()
    }

    /// Makes memory reads fail as under file descriptor exhaustion.
    pub fn set_memory_failing(&self, failing: bool) {
        self.memory_failing.store(failing, Ordering::SeqCst);
    }

    /// How often [`HostProbes::start`] was called.
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// How often [`HostProbes::stop`] was called.
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl HostProbes for FakeProbes {
    fn active_handle_count(&self) -> usize {
        self.handles.load(Ordering::SeqCst)
    }

    fn active_request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn memory_usage(&self) -> Result<MemoryUsage, ProbeError> {
        if self.memory_failing.load(Ordering::SeqCst) {
            let err = io::Error::new(io::ErrorKind::Other, "too many open files");
            return Err(err.into());
        }
        Ok(self.memory())
    }

    fn event_loop_lag_ms(&self) -> f64 {
        *self.lag_ms.lock().unwrap()
    }

    fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// A GC source whose hook is triggered by hand.
#[derive(Default)]
pub struct CountingGcSource {
    hook: Mutex<Option<GcHook>>,
    installs: AtomicUsize,
}

impl CountingGcSource {
    /// Creates a source with no hook installed.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Arc<CountingGcSource> {
        Arc::new(CountingGcSource::default())
    }

    /// How often a hook was installed.
    pub fn install_count(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    /// Delivers a notification to the installed hook, if any.
    pub fn emit(&self, raw: RawGcStats) {
        let hook = self.hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(raw);
        }
    }
}

impl GcSource for CountingGcSource {
    fn install(&self, hook: GcHook) {
        self.installs.fetch_add(1, Ordering::SeqCst);
        *self.hook.lock().unwrap() = Some(hook);
    }
}
