//! The reporter facade tying configuration, scheduling, sampling and GC
//! reporting together.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::cache::SampleCache;
use crate::config::{ReporterConfig, ReporterOptions};
use crate::error::{ConfigError, ReporterError};
use crate::gc::{GcListener, GcSubscription};
use crate::protocol::{Family, GcSample, MemoryUsage};
use crate::sampler::Sampler;
use crate::scheduler::{Scheduler, TaskJob};
use crate::sink::SinkAdapter;

/// Creates a reporter from `options`.
///
/// This is a shortcut for [`ProcessReporter::new`]. The reporter is idle
/// until [`bootstrap`](ProcessReporter::bootstrap) is called.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use process_reporter::{MetricSink, ReporterOptions};
///
/// struct Discard;
///
/// impl MetricSink for Discard {
///     fn timing(&self, _name: &str, _value: f64) {}
///     fn gauge(&self, _name: &str, _value: f64) {}
/// }
///
/// let reporter = process_reporter::create(ReporterOptions::new(Arc::new(Discard))).unwrap();
/// reporter.bootstrap().unwrap();
/// reporter.destroy();
/// ```
pub fn create(options: ReporterOptions) -> Result<ProcessReporter, ConfigError> {
    ProcessReporter::new(options)
}

#[derive(Default)]
struct Lifecycle {
    gc_subscription: Option<GcSubscription>,
    probes_started: bool,
}

struct ReporterInner {
    config: ReporterConfig,
    sink: SinkAdapter,
    cache: SampleCache,
    scheduler: Scheduler,
    running: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
}

impl ReporterInner {
    fn sampler(&self) -> Sampler<'_> {
        Sampler {
            probes: &**self.config.probes(),
            sink: &self.sink,
            cache: &self.cache,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Periodically samples process health and writes it to metric sinks.
///
/// Each enabled family (handles, requests, memory, lag) gets its own
/// self-rescheduling task; GC pauses are reported as they are announced by
/// the configured [`GcBridge`](crate::GcBridge).
///
/// Dropping the reporter destroys it.
pub struct ProcessReporter {
    inner: Arc<ReporterInner>,
}

impl ProcessReporter {
    /// Validates `options` and creates an idle reporter.
    pub fn new(options: ReporterOptions) -> Result<ProcessReporter, ConfigError> {
        let config = ReporterConfig::resolve(options)?;
        let sink = SinkAdapter::new(
            config.prefix(),
            config.sink().clone(),
            config.cluster_sink().cloned(),
        );
        let scheduler = Scheduler::new(config.timers().clone(), config.periodic_families());
        Ok(ProcessReporter {
            inner: Arc::new(ReporterInner {
                config,
                sink,
                cache: SampleCache::default(),
                scheduler,
                running: AtomicBool::new(false),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        })
    }

    /// The resolved configuration.
    pub fn config(&self) -> &ReporterConfig {
        &self.inner.config
    }

    /// Whether the reporter is bootstrapped and not yet destroyed.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Whether the task of `family` has a pending timer.
    pub fn is_armed(&self, family: Family) -> bool {
        self.inner.scheduler.is_armed(family)
    }

    /// Number of periodic tasks with a pending timer.
    pub fn armed_count(&self) -> usize {
        self.inner.scheduler.armed_count()
    }

    /// Whether this reporter holds a GC subscription.
    pub fn is_subscribed_to_gc(&self) -> bool {
        self.inner.lock().gc_subscription.is_some()
    }

    /// Arms every enabled task and subscribes to GC notifications.
    ///
    /// Calling this on a running reporter does nothing. If the GC bridge
    /// has no free slot the error is returned and nothing is armed.
    pub fn bootstrap(&self) -> Result<(), ReporterError> {
        let inner = &self.inner;
        let config = &inner.config;
        let mut lifecycle = inner.lock();
        if inner.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        if config.is_enabled(Family::Gc) {
            let bridge = config.gc_bridge();
            bridge.install(&**config.gc_source());
            let subscription = bridge.subscribe(gc_listener(Arc::downgrade(inner)))?;
            lifecycle.gc_subscription = Some(subscription);
        }

        if config.is_enabled(Family::Lag) {
            config.probes().start();
            lifecycle.probes_started = true;
        }

        inner.running.store(true, Ordering::SeqCst);
        inner
            .scheduler
            .start_all(|family| sample_job(Arc::downgrade(inner), family));

        log::debug!(
            "process reporter started with prefix {:?} ({} tasks armed)",
            config.prefix(),
            inner.scheduler.armed_count()
        );
        Ok(())
    }

    /// Cancels every pending timer and drops the GC subscription.
    ///
    /// Safe to call any number of times, including before
    /// [`bootstrap`](Self::bootstrap). A sample already in progress may
    /// still complete.
    pub fn destroy(&self) {
        let inner = &self.inner;
        let mut lifecycle = inner.lock();
        let was_running = inner.running.swap(false, Ordering::SeqCst);

        inner.scheduler.stop_all();
        if let Some(subscription) = lifecycle.gc_subscription.take() {
            inner.config.gc_bridge().unsubscribe(subscription);
        }
        if std::mem::take(&mut lifecycle.probes_started) {
            inner.config.probes().stop();
        }

        if was_running {
            log::debug!("process reporter stopped");
        }
    }

    /// The most recent successful memory reading, if any.
    pub fn get_cached_memory_usage(&self) -> Option<MemoryUsage> {
        self.inner.cache.memory()
    }

    /// The most recent lag reading in milliseconds, if any.
    pub fn get_cached_lag_time(&self) -> Option<f64> {
        self.inner.cache.lag_ms()
    }
}

fn sample_job(inner: Weak<ReporterInner>, family: Family) -> TaskJob {
    Arc::new(move || {
        if let Some(inner) = inner.upgrade() {
            inner.sampler().sample(family);
        }
    })
}

fn gc_listener(inner: Weak<ReporterInner>) -> GcListener {
    Arc::new(move |sample: &GcSample| {
        if let Some(inner) = inner.upgrade() {
            if inner.running.load(Ordering::SeqCst) {
                inner.sink.report_gc(sample);
            }
        }
    })
}

impl Drop for ProcessReporter {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for ProcessReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessReporter")
            .field("config", &self.inner.config)
            .field("running", &self.is_running())
            .field("armed", &self.armed_count())
            .finish()
    }
}
