//! Probes reading from the current process.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{HostProbes, LagMonitor};
use crate::error::ProbeError;
use crate::protocol::MemoryUsage;

/// Counts in-flight requests.
///
/// Hosts call [`track`](Self::track) when a request starts and keep the
/// returned guard alive until it finishes.
#[derive(Clone, Debug, Default)]
pub struct RequestTracker {
    in_flight: Arc<AtomicUsize>,
}

impl RequestTracker {
    /// Creates a tracker with no requests in flight.
    pub fn new() -> RequestTracker {
        RequestTracker::default()
    }

    /// Marks one request as in flight until the guard is dropped.
    pub fn track(&self) -> InFlightRequest {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightRequest {
            in_flight: self.in_flight.clone(),
        }
    }

    /// Number of requests currently in flight.
    pub fn count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Guard returned by [`RequestTracker::track`].
#[derive(Debug)]
#[must_use = "the request is only counted while the guard is alive"]
pub struct InFlightRequest {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for InFlightRequest {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The built-in [`HostProbes`] for the running process.
///
/// Active handles are open file descriptors, listed from `/proc/self/fd` on
/// Linux and `/dev/fd` on other unix systems. When the directory cannot be
/// opened (for example with all descriptors in use) the count reads as zero
/// for that cycle. Platforms without either directory always report zero.
///
/// Outside Linux the RSS comes from `getrusage` and is the peak resident set
/// size rather than the current one.
pub struct ProcessProbes {
    requests: RequestTracker,
    lag: LagMonitor,
}

impl ProcessProbes {
    /// Creates probes with a fresh request tracker and lag monitor.
    pub fn new() -> ProcessProbes {
        ProcessProbes::with_parts(RequestTracker::new(), LagMonitor::new())
    }

    /// Creates probes from an existing tracker and lag monitor.
    pub fn with_parts(requests: RequestTracker, lag: LagMonitor) -> ProcessProbes {
        ProcessProbes { requests, lag }
    }

    /// The tracker feeding the request count.
    pub fn requests(&self) -> &RequestTracker {
        &self.requests
    }

    /// The lag monitor feeding the lag value.
    pub fn lag_monitor(&self) -> &LagMonitor {
        &self.lag
    }
}

impl Default for ProcessProbes {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProcessProbes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessProbes")
            .field("requests", &self.requests.count())
            .field("lag", &self.lag)
            .finish()
    }
}

impl HostProbes for ProcessProbes {
    fn active_handle_count(&self) -> usize {
        match get_open_fds() {
            Ok(count) => count,
            Err(err) => {
                log::debug!("cannot count open file descriptors: {err}");
                0
            }
        }
    }

    fn active_request_count(&self) -> usize {
        self.requests.count()
    }

    fn memory_usage(&self) -> Result<MemoryUsage, ProbeError> {
        get_memory_usage()
    }

    fn event_loop_lag_ms(&self) -> f64 {
        self.lag.lag_ms()
    }

    fn start(&self) {
        self.lag.start();
    }

    fn stop(&self) {
        self.lag.stop();
    }
}

/// Gets the number of open file descriptors.
#[cfg(unix)]
fn get_open_fds() -> Result<usize, ProbeError> {
    let dir = if cfg!(target_os = "linux") {
        "/proc/self/fd"
    } else {
        "/dev/fd"
    };
    let entries = std::fs::read_dir(dir)?;
    // the directory handle itself is one of the entries
    Ok(entries.count().saturating_sub(1))
}

/// Gets the number of open file descriptors.
#[cfg(not(unix))]
fn get_open_fds() -> Result<usize, ProbeError> {
    Err(ProbeError::Unsupported("open file descriptors"))
}

/// Reads RSS and heap size.
///
/// Without jemalloc the heap is approximated by the data segment, which is
/// reported as both used and total.
#[cfg(target_os = "linux")]
fn get_memory_usage() -> Result<MemoryUsage, ProbeError> {
    // Format: size resident shared text lib data dt, in pages
    let statm = std::fs::read_to_string("/proc/self/statm")?;
    let fields: Vec<f64> = statm
        .split_whitespace()
        .filter_map(|field| field.parse().ok())
        .collect();
    if fields.len() < 6 {
        return Err(ProbeError::Unsupported("unexpected /proc/self/statm format"));
    }

    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as f64;
    let rss = fields[1] * page_size;
    let data = fields[5] * page_size;

    let (heap_used, heap_total) = jemalloc_heap().unwrap_or((data, data));
    Ok(MemoryUsage {
        rss,
        heap_used,
        heap_total,
    })
}

/// Reads RSS and heap size.
#[cfg(all(unix, not(target_os = "linux")))]
fn get_memory_usage() -> Result<MemoryUsage, ProbeError> {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    if unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) } != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    // peak RSS; bytes on macOS, kilobytes elsewhere
    let scale = if cfg!(target_os = "macos") { 1.0 } else { 1024.0 };
    let rss = usage.ru_maxrss as f64 * scale;
    let (heap_used, heap_total) = jemalloc_heap().unwrap_or((rss, rss));
    Ok(MemoryUsage {
        rss,
        heap_used,
        heap_total,
    })
}

/// Fallback for unsupported platforms.
#[cfg(not(unix))]
fn get_memory_usage() -> Result<MemoryUsage, ProbeError> {
    Err(ProbeError::Unsupported("memory usage"))
}

/// Gets jemalloc `(allocated, active)` bytes.
#[cfg(all(unix, feature = "jemalloc"))]
fn jemalloc_heap() -> Option<(f64, f64)> {
    use tikv_jemalloc_ctl::{epoch, stats};

    // Advance the epoch to get fresh stats
    epoch::advance().ok()?;

    let allocated = stats::allocated::read().ok()? as f64;
    let active = stats::active::read().ok()? as f64;
    Some((allocated, active))
}

#[cfg(not(all(unix, feature = "jemalloc")))]
fn jemalloc_heap() -> Option<(f64, f64)> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tracker() {
        let tracker = RequestTracker::new();
        let first = tracker.track();
        let second = tracker.clone().track();
        assert_eq!(tracker.count(), 2);
        drop(first);
        assert_eq!(tracker.count(), 1);
        drop(second);
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn test_process_probes_requests() {
        let probes = ProcessProbes::new();
        let _request = probes.requests().track();
        assert_eq!(probes.active_request_count(), 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_memory_usage() {
        let probes = ProcessProbes::new();
        let usage = probes.memory_usage().unwrap();
        assert!(usage.rss > 0.0);
        assert!(usage.heap_total > 0.0);
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    #[test]
    fn test_peak_rss_in_bytes() {
        // any test binary holds more than a megabyte resident
        let usage = ProcessProbes::new().memory_usage().unwrap();
        assert!(usage.rss > 1024.0 * 1024.0);
    }

    #[cfg(unix)]
    #[test]
    fn test_handle_count() {
        let _file = std::fs::File::open("Cargo.toml").unwrap();
        assert!(get_open_fds().unwrap() > 0);
        assert!(ProcessProbes::new().active_handle_count() > 0);
    }

    #[cfg(not(unix))]
    #[test]
    fn test_handle_count_unsupported() {
        assert!(matches!(get_open_fds(), Err(ProbeError::Unsupported(_))));
        assert_eq!(ProcessProbes::new().active_handle_count(), 0);
    }
}
