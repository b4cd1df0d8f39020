//! This crate periodically samples the health of the running process and
//! reports it to statsd-style metric sinks.
//!
//! A [`ProcessReporter`] owns one self-rescheduling task per metric family:
//!
//! | family  | metric                                         | kind   |
//! |---------|------------------------------------------------|--------|
//! | handle  | `process-reporter.handles`                     | timing |
//! | request | `process-reporter.requests`                    | timing |
//! | memory  | `process-reporter.memory-usage.{rss,heap-used,heap-total}` | gauge |
//! | lag     | `process-reporter.lag-sampler`                 | timing |
//!
//! Garbage collection pauses are reported as they happen through the
//! process-wide [`GcBridge`], as `process-reporter.gc.{type}.pause-ms`
//! timings plus `heap-used` and `heap-total` gauges.
//!
//! Every name is qualified with the configured prefix. Lag and GC pause
//! timings additionally go to the optional cluster sink.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cadence::{StatsdClient, UdpMetricSink};
//! use process_reporter::ReporterOptions;
//!
//! let socket = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
//! let statsd = UdpMetricSink::from("127.0.0.1:8125", socket).unwrap();
//! let client = StatsdClient::from_sink("", statsd);
//!
//! let reporter = process_reporter::create(
//!     ReporterOptions::new(Arc::new(client)).with_prefix("my-service"),
//! )
//! .unwrap();
//! reporter.bootstrap().unwrap();
//!
//! // ... run the application ...
//!
//! reporter.destroy();
//! ```
//!
//! # Features
//!
//! - `feature = "statsd"` (default): implements [`MetricSink`] for
//!   `cadence::StatsdClient`.
//! - `feature = "jemalloc"`: reads heap statistics from jemalloc instead of
//!   approximating the heap by the data segment.
//! - `feature = "test"`: Activates the [`test`] module with a recording sink,
//!   scripted probes and a manually triggered GC source.
//!
//! [`test`]: test/index.html

#![warn(missing_docs)]

mod cache;
mod config;
mod error;
mod gc;
mod probes;
mod protocol;
mod reporter;
mod sampler;
mod scheduler;
mod sink;
mod timer;

pub use crate::config::{
    normalize_prefix, ReporterConfig, ReporterOptions, ReporterSettings,
    DEFAULT_HANDLE_INTERVAL, DEFAULT_LAG_INTERVAL, DEFAULT_MEMORY_INTERVAL,
    DEFAULT_REQUEST_INTERVAL, PREFIX_ENV_VAR,
};
pub use crate::error::{ConfigError, GcBridgeError, ProbeError, ReporterError};
pub use crate::gc::{
    GcBridge, GcHook, GcListener, GcSource, GcSubscription, NoopGcSource,
    DEFAULT_GC_SUBSCRIBER_CAPACITY,
};
pub use crate::probes::{HostProbes, InFlightRequest, LagMonitor, ProcessProbes, RequestTracker};
pub use crate::protocol::{
    Family, GcSample, GcType, HeapDiff, MemoryUsage, MetricKind, RawGcStats, METRIC_NAMESPACE,
};
pub use crate::reporter::{create, ProcessReporter};
pub use crate::sink::{MetricSink, SinkAdapter};
pub use crate::timer::{ManualTimers, ThreadTimers, TimerCallback, TimerHandle, TimerProvider};

// test utilities
#[cfg(any(test, feature = "test"))]
pub mod test;
