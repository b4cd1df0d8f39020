//! Reporter configuration.
//!
//! [`ReporterOptions`] is what the embedding application fills in; it is
//! resolved exactly once into an immutable [`ReporterConfig`], applying
//! defaults and rejecting invalid values.

use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::gc::{GcBridge, GcSource, NoopGcSource};
use crate::probes::{HostProbes, ProcessProbes};
use crate::protocol::Family;
use crate::sink::MetricSink;
use crate::timer::{ThreadTimers, TimerProvider};

/// Default handle sampling interval.
pub const DEFAULT_HANDLE_INTERVAL: Duration = Duration::from_millis(1000);
/// Default request sampling interval.
pub const DEFAULT_REQUEST_INTERVAL: Duration = Duration::from_millis(100);
/// Default memory sampling interval.
pub const DEFAULT_MEMORY_INTERVAL: Duration = Duration::from_millis(1000);
/// Default lag sampling interval.
pub const DEFAULT_LAG_INTERVAL: Duration = Duration::from_millis(500);

/// Environment variable consulted when no prefix is configured.
pub const PREFIX_ENV_VAR: &str = "PROCESS_REPORTER_PREFIX";

/// Separator between the prefix and the metric namespace.
const SEPARATOR: char = '.';

/// Plain-data reporter settings, loadable from a config file.
///
/// Field names follow the option names of the reporter's configuration
/// surface, with intervals in milliseconds:
///
/// ```
/// use process_reporter::ReporterSettings;
///
/// let settings: ReporterSettings =
///     serde_json::from_str(r#"{"prefix": "web", "lagInterval": 250, "gcEnabled": false}"#)
///         .unwrap();
/// assert_eq!(settings.lag_interval, Some(250));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReporterSettings {
    /// Metric name prefix.
    pub prefix: Option<String>,
    /// Handle sampling interval in milliseconds.
    pub handle_interval: Option<u64>,
    /// Request sampling interval in milliseconds.
    pub request_interval: Option<u64>,
    /// Memory sampling interval in milliseconds.
    pub memory_interval: Option<u64>,
    /// Lag sampling interval in milliseconds.
    pub lag_interval: Option<u64>,
    /// Enables handle sampling.
    pub handle_enabled: Option<bool>,
    /// Enables request sampling.
    pub request_enabled: Option<bool>,
    /// Enables memory sampling.
    pub memory_enabled: Option<bool>,
    /// Enables lag sampling.
    pub lag_enabled: Option<bool>,
    /// Enables GC reporting.
    pub gc_enabled: Option<bool>,
}

/// Options for creating a reporter.
///
/// Every field is optional except `sink`; unset fields take their defaults
/// when the options are resolved.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use process_reporter::{Family, MetricSink, ReporterOptions};
///
/// struct Discard;
///
/// impl MetricSink for Discard {
///     fn timing(&self, _name: &str, _value: f64) {}
///     fn gauge(&self, _name: &str, _value: f64) {}
/// }
///
/// let options = ReporterOptions::new(Arc::new(Discard))
///     .with_prefix("web")
///     .with_interval(Family::Lag, Duration::from_millis(250))
///     .with_enabled(Family::Gc, false);
/// ```
#[derive(Clone, Default)]
pub struct ReporterOptions {
    /// The primary sink. Required.
    pub sink: Option<Arc<dyn MetricSink>>,
    /// The cluster sink receiving lag and GC pause timings.
    pub cluster_sink: Option<Arc<dyn MetricSink>>,
    /// Metric name prefix. Defaults to `$PROCESS_REPORTER_PREFIX` or `""`.
    pub prefix: Option<String>,
    /// Handle sampling interval (default 1000ms).
    pub handle_interval: Option<Duration>,
    /// Request sampling interval (default 100ms).
    pub request_interval: Option<Duration>,
    /// Memory sampling interval (default 1000ms).
    pub memory_interval: Option<Duration>,
    /// Lag sampling interval (default 500ms).
    pub lag_interval: Option<Duration>,
    /// Enables handle sampling (default true).
    pub handle_enabled: Option<bool>,
    /// Enables request sampling (default true).
    pub request_enabled: Option<bool>,
    /// Enables memory sampling (default true).
    pub memory_enabled: Option<bool>,
    /// Enables lag sampling (default true).
    pub lag_enabled: Option<bool>,
    /// Enables GC reporting (default true).
    pub gc_enabled: Option<bool>,
    /// Timer provider (default: the process-wide [`ThreadTimers`]).
    pub timers: Option<Arc<dyn TimerProvider>>,
    /// Host probes (default: a new [`ProcessProbes`]).
    pub probes: Option<Arc<dyn HostProbes>>,
    /// Native GC notification source (default: [`NoopGcSource`]).
    pub gc_source: Option<Arc<dyn GcSource>>,
    /// GC bridge to subscribe to (default: [`GcBridge::global`]).
    pub gc_bridge: Option<Arc<GcBridge>>,
}

impl ReporterOptions {
    /// Creates options reporting to `sink`.
    pub fn new(sink: Arc<dyn MetricSink>) -> ReporterOptions {
        ReporterOptions {
            sink: Some(sink),
            ..Default::default()
        }
    }

    /// Sets the cluster sink.
    #[must_use]
    pub fn with_cluster_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.cluster_sink = Some(sink);
        self
    }

    /// Sets the metric name prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Sets the sampling interval of a periodic family.
    ///
    /// GC reporting is event driven; setting its interval has no effect.
    #[must_use]
    pub fn with_interval(mut self, family: Family, interval: Duration) -> Self {
        match family {
            Family::Handle => self.handle_interval = Some(interval),
            Family::Request => self.request_interval = Some(interval),
            Family::Memory => self.memory_interval = Some(interval),
            Family::Lag => self.lag_interval = Some(interval),
            Family::Gc => {}
        }
        self
    }

    /// Enables or disables a family.
    #[must_use]
    pub fn with_enabled(mut self, family: Family, enabled: bool) -> Self {
        *self.enabled_mut(family) = Some(enabled);
        self
    }

    /// Sets the timer provider.
    #[must_use]
    pub fn with_timers(mut self, timers: Arc<dyn TimerProvider>) -> Self {
        self.timers = Some(timers);
        self
    }

    /// Sets the host probes.
    #[must_use]
    pub fn with_probes(mut self, probes: Arc<dyn HostProbes>) -> Self {
        self.probes = Some(probes);
        self
    }

    /// Sets the native GC notification source.
    #[must_use]
    pub fn with_gc_source(mut self, source: Arc<dyn GcSource>) -> Self {
        self.gc_source = Some(source);
        self
    }

    /// Subscribes to `bridge` instead of the process-wide one.
    #[must_use]
    pub fn with_gc_bridge(mut self, bridge: Arc<GcBridge>) -> Self {
        self.gc_bridge = Some(bridge);
        self
    }

    /// Overrides options with every value present in `settings`.
    #[must_use]
    pub fn with_settings(mut self, settings: ReporterSettings) -> Self {
        if let Some(prefix) = settings.prefix {
            self.prefix = Some(prefix);
        }
        let intervals = [
            (Family::Handle, settings.handle_interval),
            (Family::Request, settings.request_interval),
            (Family::Memory, settings.memory_interval),
            (Family::Lag, settings.lag_interval),
        ];
        for (family, millis) in intervals
            .into_iter()
            .filter_map(|(family, millis)| Some((family, millis?)))
        {
            self = self.with_interval(family, Duration::from_millis(millis));
        }
        let enabled = [
            (Family::Handle, settings.handle_enabled),
            (Family::Request, settings.request_enabled),
            (Family::Memory, settings.memory_enabled),
            (Family::Lag, settings.lag_enabled),
            (Family::Gc, settings.gc_enabled),
        ];
        for (family, flag) in enabled
            .into_iter()
            .filter_map(|(family, flag)| Some((family, flag?)))
        {
            self = self.with_enabled(family, flag);
        }
        self
    }

    fn enabled_mut(&mut self, family: Family) -> &mut Option<bool> {
        match family {
            Family::Handle => &mut self.handle_enabled,
            Family::Request => &mut self.request_enabled,
            Family::Memory => &mut self.memory_enabled,
            Family::Lag => &mut self.lag_enabled,
            Family::Gc => &mut self.gc_enabled,
        }
    }
}

impl fmt::Debug for ReporterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReporterOptions")
            .field("has_sink", &self.sink.is_some())
            .field("has_cluster_sink", &self.cluster_sink.is_some())
            .field("prefix", &self.prefix)
            .field("handle_interval", &self.handle_interval)
            .field("request_interval", &self.request_interval)
            .field("memory_interval", &self.memory_interval)
            .field("lag_interval", &self.lag_interval)
            .field("handle_enabled", &self.handle_enabled)
            .field("request_enabled", &self.request_enabled)
            .field("memory_enabled", &self.memory_enabled)
            .field("lag_enabled", &self.lag_enabled)
            .field("gc_enabled", &self.gc_enabled)
            .finish_non_exhaustive()
    }
}

/// Appends the separator to a non-empty prefix that lacks it.
pub fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with(SEPARATOR) {
        prefix.to_owned()
    } else {
        format!("{prefix}{SEPARATOR}")
    }
}

/// Validated, immutable reporter configuration.
#[derive(Clone)]
pub struct ReporterConfig {
    prefix: String,
    handle_interval: Duration,
    request_interval: Duration,
    memory_interval: Duration,
    lag_interval: Duration,
    handle_enabled: bool,
    request_enabled: bool,
    memory_enabled: bool,
    lag_enabled: bool,
    gc_enabled: bool,
    sink: Arc<dyn MetricSink>,
    cluster_sink: Option<Arc<dyn MetricSink>>,
    timers: Arc<dyn TimerProvider>,
    probes: Arc<dyn HostProbes>,
    gc_source: Arc<dyn GcSource>,
    gc_bridge: Arc<GcBridge>,
}

impl ReporterConfig {
    /// Validates `options` and applies defaults.
    pub fn resolve(options: ReporterOptions) -> Result<ReporterConfig, ConfigError> {
        let sink = options.sink.ok_or(ConfigError::MissingSink)?;
        let prefix = options
            .prefix
            .or_else(|| env::var(PREFIX_ENV_VAR).ok())
            .unwrap_or_default();

        Ok(ReporterConfig {
            prefix: normalize_prefix(&prefix),
            handle_interval: interval(
                "handleInterval",
                options.handle_interval,
                DEFAULT_HANDLE_INTERVAL,
            )?,
            request_interval: interval(
                "requestInterval",
                options.request_interval,
                DEFAULT_REQUEST_INTERVAL,
            )?,
            memory_interval: interval(
                "memoryInterval",
                options.memory_interval,
                DEFAULT_MEMORY_INTERVAL,
            )?,
            lag_interval: interval("lagInterval", options.lag_interval, DEFAULT_LAG_INTERVAL)?,
            handle_enabled: options.handle_enabled.unwrap_or(true),
            request_enabled: options.request_enabled.unwrap_or(true),
            memory_enabled: options.memory_enabled.unwrap_or(true),
            lag_enabled: options.lag_enabled.unwrap_or(true),
            gc_enabled: options.gc_enabled.unwrap_or(true),
            sink,
            cluster_sink: options.cluster_sink,
            timers: options.timers.unwrap_or_else(|| ThreadTimers::global()),
            probes: options
                .probes
                .unwrap_or_else(|| Arc::new(ProcessProbes::new())),
            gc_source: options.gc_source.unwrap_or_else(|| Arc::new(NoopGcSource)),
            gc_bridge: options.gc_bridge.unwrap_or_else(GcBridge::global),
        })
    }

    /// The normalized prefix, empty or ending in `.`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The sampling interval of a periodic family; `None` for GC.
    pub fn interval(&self, family: Family) -> Option<Duration> {
        match family {
            Family::Handle => Some(self.handle_interval),
            Family::Request => Some(self.request_interval),
            Family::Memory => Some(self.memory_interval),
            Family::Lag => Some(self.lag_interval),
            Family::Gc => None,
        }
    }

    /// Whether a family is enabled.
    pub fn is_enabled(&self, family: Family) -> bool {
        match family {
            Family::Handle => self.handle_enabled,
            Family::Request => self.request_enabled,
            Family::Memory => self.memory_enabled,
            Family::Lag => self.lag_enabled,
            Family::Gc => self.gc_enabled,
        }
    }

    /// The enabled periodic families with their intervals.
    pub fn periodic_families(&self) -> impl Iterator<Item = (Family, Duration)> + '_ {
        Family::PERIODIC
            .into_iter()
            .filter(move |family| self.is_enabled(*family))
            .filter_map(move |family| self.interval(family).map(|interval| (family, interval)))
    }

    /// The primary sink.
    pub fn sink(&self) -> &Arc<dyn MetricSink> {
        &self.sink
    }

    /// The cluster sink, if any.
    pub fn cluster_sink(&self) -> Option<&Arc<dyn MetricSink>> {
        self.cluster_sink.as_ref()
    }

    /// The timer provider.
    pub fn timers(&self) -> &Arc<dyn TimerProvider> {
        &self.timers
    }

    /// The host probes.
    pub fn probes(&self) -> &Arc<dyn HostProbes> {
        &self.probes
    }

    /// The native GC source.
    pub fn gc_source(&self) -> &Arc<dyn GcSource> {
        &self.gc_source
    }

    /// The GC bridge.
    pub fn gc_bridge(&self) -> &Arc<GcBridge> {
        &self.gc_bridge
    }
}

fn interval(
    field: &'static str,
    value: Option<Duration>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        Some(interval) if interval.is_zero() => Err(ConfigError::InvalidInterval { field }),
        Some(interval) => Ok(interval),
        None => Ok(default),
    }
}

impl fmt::Debug for ReporterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReporterConfig")
            .field("prefix", &self.prefix)
            .field("handle_interval", &self.handle_interval)
            .field("request_interval", &self.request_interval)
            .field("memory_interval", &self.memory_interval)
            .field("lag_interval", &self.lag_interval)
            .field("handle_enabled", &self.handle_enabled)
            .field("request_enabled", &self.request_enabled)
            .field("memory_enabled", &self.memory_enabled)
            .field("lag_enabled", &self.lag_enabled)
            .field("gc_enabled", &self.gc_enabled)
            .field("has_cluster_sink", &self.cluster_sink.is_some())
            .field("gc_bridge", &self.gc_bridge)
            .finish_non_exhaustive()
    }
}
