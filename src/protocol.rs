//! Data types shared between probes, samplers and sinks.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Namespace every emitted metric lives under (after the configured prefix).
pub const METRIC_NAMESPACE: &str = "process-reporter";

/// The independently scheduled metric families.
///
/// GC reporting is event driven and therefore has no periodic task; it is
/// still a family for the purpose of enabling and disabling it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    /// Active I/O handles.
    Handle,
    /// In-flight requests.
    Request,
    /// Memory footprint.
    Memory,
    /// Scheduler lag.
    Lag,
    /// Garbage collection pauses.
    Gc,
}

impl Family {
    /// The families driven by a periodic task, in arming order.
    pub const PERIODIC: [Family; 4] = [
        Family::Handle,
        Family::Request,
        Family::Memory,
        Family::Lag,
    ];

    /// Short lowercase name, as used in logs and option names.
    pub fn as_str(self) -> &'static str {
        match self {
            Family::Handle => "handle",
            Family::Request => "request",
            Family::Memory => "memory",
            Family::Lag => "lag",
            Family::Gc => "gc",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of observation handed to a sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// A timing (or distribution) observation.
    Timing,
    /// A point-in-time value.
    Gauge,
}

/// One memory usage reading, in bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    /// Resident set size.
    pub rss: f64,
    /// Heap bytes in use.
    pub heap_used: f64,
    /// Heap bytes reserved.
    pub heap_total: f64,
}

/// Classification of a garbage collection cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcType {
    /// Young generation collection (`gctype` 1).
    Minor,
    /// Full mark/sweep/compact (`gctype` 2).
    Major,
    /// Both in one cycle (`gctype` 3).
    Both,
    /// Any other code.
    Unknown,
}

impl GcType {
    /// Maps a native `gctype` code to its category.
    pub fn from_code(code: i64) -> GcType {
        match code {
            1 => GcType::Minor,
            2 => GcType::Major,
            3 => GcType::Both,
            _ => GcType::Unknown,
        }
    }

    /// The name used in the metric path.
    pub fn as_str(self) -> &'static str {
        match self {
            GcType::Minor => "minor",
            GcType::Major => "major",
            GcType::Both => "both",
            GcType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for GcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heap size change reported alongside a raw GC notification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeapDiff {
    /// Change of used heap bytes.
    pub used_heap_size: f64,
    /// Change of total heap bytes.
    pub total_heap_size: f64,
}

/// A GC notification as delivered by a native collector hook.
///
/// Deserializes from `{"gctype": 1, "pauseMS": 2.5, "diff": {...}}`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawGcStats {
    /// Native collection type code.
    pub gctype: i64,
    /// Pause duration in milliseconds.
    #[serde(rename = "pauseMS")]
    pub pause_ms: f64,
    /// Heap size deltas.
    #[serde(default)]
    pub diff: HeapDiff,
}

/// A classified GC event, delivered to every subscribed reporter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GcSample {
    /// Collection category.
    pub gc_type: GcType,
    /// Pause duration in milliseconds.
    pub pause_ms: f64,
    /// Change of used heap bytes.
    pub heap_used_delta: f64,
    /// Change of total heap bytes.
    pub heap_total_delta: f64,
}

impl From<RawGcStats> for GcSample {
    fn from(raw: RawGcStats) -> Self {
        GcSample {
            gc_type: GcType::from_code(raw.gctype),
            pause_ms: raw.pause_ms.max(0.0),
            heap_used_delta: raw.diff.used_heap_size,
            heap_total_delta: raw.diff.total_heap_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gc_type_codes() {
        assert_eq!(GcType::from_code(1), GcType::Minor);
        assert_eq!(GcType::from_code(2), GcType::Major);
        assert_eq!(GcType::from_code(3), GcType::Both);
        for code in [0, 4, 8, -1, 15] {
            assert_eq!(GcType::from_code(code), GcType::Unknown);
        }
    }

    #[test]
    fn test_raw_gc_stats_from_native_shape() {
        let raw: RawGcStats = serde_json::from_str(
            r#"{"gctype": 2, "pauseMS": 3.5, "diff": {"usedHeapSize": -1024, "totalHeapSize": 0}}"#,
        )
        .unwrap();
        let sample = GcSample::from(raw);
        assert_eq!(sample.gc_type, GcType::Major);
        assert_eq!(sample.pause_ms, 3.5);
        assert_eq!(sample.heap_used_delta, -1024.0);
        assert_eq!(sample.heap_total_delta, 0.0);
    }

    #[test]
    fn test_memory_usage_serialization() {
        let usage = MemoryUsage {
            rss: 1.0,
            heap_used: 2.0,
            heap_total: 3.0,
        };
        let json = serde_json::to_string(&usage).unwrap();
        assert!(json.contains("heapUsed"));
        assert!(json.contains("heapTotal"));
    }
}
