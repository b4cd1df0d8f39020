//! Metric sinks and the fan-out adapter in front of them.

use std::fmt;
use std::sync::Arc;

use crate::protocol::{GcSample, MemoryUsage, MetricKind, METRIC_NAMESPACE};

/// A destination for named timing and gauge observations.
///
/// Sinks are best effort: the reporter never buffers, retries or inspects
/// the outcome of a write.
pub trait MetricSink: Send + Sync + 'static {
    /// Records a timing observation.
    fn timing(&self, name: &str, value: f64);

    /// Records a gauge value.
    fn gauge(&self, name: &str, value: f64);
}

impl<S: MetricSink + ?Sized> MetricSink for Arc<S> {
    fn timing(&self, name: &str, value: f64) {
        (**self).timing(name, value)
    }

    fn gauge(&self, name: &str, value: f64) {
        (**self).gauge(name, value)
    }
}

impl<S: MetricSink + ?Sized> MetricSink for Box<S> {
    fn timing(&self, name: &str, value: f64) {
        (**self).timing(name, value)
    }

    fn gauge(&self, name: &str, value: f64) {
        (**self).gauge(name, value)
    }
}

#[cfg(feature = "statsd")]
mod statsd {
    use cadence::prelude::*;
    use cadence::StatsdClient;

    use super::MetricSink;

    /// Writes through a [`cadence`] client.
    ///
    /// Timings are truncated to whole milliseconds, which is what the statsd
    /// `ms` type carries.
    impl MetricSink for StatsdClient {
        fn timing(&self, name: &str, value: f64) {
            let millis = if value.is_finite() && value > 0.0 {
                value.round() as u64
            } else {
                0
            };
            if let Err(err) = self.time(name, millis) {
                log::debug!("statsd timing {name} dropped: {err}");
            }
        }

        fn gauge(&self, name: &str, value: f64) {
            if let Err(err) = Gauged::<f64>::gauge(self, name, value) {
                log::debug!("statsd gauge {name} dropped: {err}");
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use std::io;
        use std::sync::{Arc, Mutex};

        use cadence::MetricSink as CadenceSink;

        use super::*;
        use crate::sink::SinkAdapter;

        /// Captures the statsd lines a client writes.
        #[derive(Clone, Default)]
        struct LineSink {
            lines: Arc<Mutex<Vec<String>>>,
        }

        impl CadenceSink for LineSink {
            fn emit(&self, metric: &str) -> io::Result<usize> {
                self.lines.lock().unwrap().push(metric.to_owned());
                Ok(metric.len())
            }
        }

        #[test]
        fn test_statsd_wire_lines() {
            let sink = LineSink::default();
            let client = StatsdClient::from_sink("", sink.clone());

            MetricSink::timing(&client, "x", 2.6);
            MetricSink::timing(&client, "x", -1.0);
            MetricSink::timing(&client, "x", f64::NAN);
            MetricSink::gauge(&client, "g", 1.5);

            assert_eq!(
                *sink.lines.lock().unwrap(),
                vec!["x:3|ms", "x:0|ms", "x:0|ms", "g:1.5|g"]
            );
        }

        #[test]
        fn test_statsd_through_adapter() {
            let sink = LineSink::default();
            let client = Arc::new(StatsdClient::from_sink("", sink.clone()));
            let adapter = SinkAdapter::new("web.", client, None);

            adapter.report_lag(12.4);
            adapter.report_handles(3);

            assert_eq!(
                *sink.lines.lock().unwrap(),
                vec![
                    "web.process-reporter.lag-sampler:12|ms",
                    "web.process-reporter.handles:3|ms",
                ]
            );
        }
    }
}

/// Whether an emission also goes to the cluster sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fanout {
    /// Worker-local: primary sink only.
    Local,
    /// Cluster-wide: primary and cluster sink.
    Cluster,
}

/// Wraps the primary and optional cluster sink.
///
/// Builds `{prefix}process-reporter.{suffix}` names and decides per family
/// where each metric goes: handle, request and memory metrics stay on the
/// primary sink, lag and GC pause timings are duplicated to the cluster sink.
#[derive(Clone)]
pub struct SinkAdapter {
    prefix: String,
    primary: Arc<dyn MetricSink>,
    cluster: Option<Arc<dyn MetricSink>>,
}

impl SinkAdapter {
    /// Creates an adapter. `prefix` must already be normalized.
    pub fn new(
        prefix: impl Into<String>,
        primary: Arc<dyn MetricSink>,
        cluster: Option<Arc<dyn MetricSink>>,
    ) -> SinkAdapter {
        SinkAdapter {
            prefix: prefix.into(),
            primary,
            cluster,
        }
    }

    /// Returns the fully qualified metric name for a suffix.
    pub fn metric_name(&self, suffix: &str) -> String {
        format!("{}{}.{}", self.prefix, METRIC_NAMESPACE, suffix)
    }

    /// Whether a cluster sink is attached.
    pub fn has_cluster_sink(&self) -> bool {
        self.cluster.is_some()
    }

    /// Reports the active handle count.
    pub fn report_handles(&self, count: usize) {
        self.emit(MetricKind::Timing, "handles", count as f64, Fanout::Local);
    }

    /// Reports the in-flight request count.
    pub fn report_requests(&self, count: usize) {
        self.emit(MetricKind::Timing, "requests", count as f64, Fanout::Local);
    }

    /// Reports one memory usage reading as three gauges.
    pub fn report_memory(&self, usage: &MemoryUsage) {
        self.emit(MetricKind::Gauge, "memory-usage.rss", usage.rss, Fanout::Local);
        self.emit(
            MetricKind::Gauge,
            "memory-usage.heap-used",
            usage.heap_used,
            Fanout::Local,
        );
        self.emit(
            MetricKind::Gauge,
            "memory-usage.heap-total",
            usage.heap_total,
            Fanout::Local,
        );
    }

    /// Reports scheduler lag in milliseconds.
    pub fn report_lag(&self, lag_ms: f64) {
        self.emit(MetricKind::Timing, "lag-sampler", lag_ms, Fanout::Cluster);
    }

    /// Reports one GC cycle.
    pub fn report_gc(&self, sample: &GcSample) {
        let gc_type = sample.gc_type.as_str();
        self.emit(
            MetricKind::Timing,
            &format!("gc.{gc_type}.pause-ms"),
            sample.pause_ms,
            Fanout::Cluster,
        );
        self.emit(
            MetricKind::Gauge,
            &format!("gc.{gc_type}.heap-used"),
            sample.heap_used_delta,
            Fanout::Local,
        );
        self.emit(
            MetricKind::Gauge,
            &format!("gc.{gc_type}.heap-total"),
            sample.heap_total_delta,
            Fanout::Local,
        );
    }

    fn emit(&self, kind: MetricKind, suffix: &str, value: f64, fanout: Fanout) {
        let name = self.metric_name(suffix);
        write_to(&*self.primary, kind, &name, value);
        if fanout == Fanout::Cluster {
            if let Some(ref cluster) = self.cluster {
                write_to(&**cluster, kind, &name, value);
            }
        }
    }
}

fn write_to(sink: &dyn MetricSink, kind: MetricKind, name: &str, value: f64) {
    match kind {
        MetricKind::Timing => sink.timing(name, value),
        MetricKind::Gauge => sink.gauge(name, value),
    }
}

impl fmt::Debug for SinkAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkAdapter")
            .field("prefix", &self.prefix)
            .field("has_cluster_sink", &self.has_cluster_sink())
            .finish()
    }
}
