//! Host introspection probes.
//!
//! The reporter never measures anything itself; it asks a [`HostProbes`]
//! implementation. [`ProcessProbes`] is the built-in one:
//! - active handles: open file descriptors
//! - active requests: an in-flight counter fed through [`RequestTracker`]
//! - memory usage: RSS and heap size
//! - lag: how late a sleeping thread wakes up ([`LagMonitor`])

mod lag;
mod process;

pub use lag::LagMonitor;
pub use process::{InFlightRequest, ProcessProbes, RequestTracker};

use crate::error::ProbeError;
use crate::protocol::MemoryUsage;

/// The runtime introspection primitives the samplers read from.
///
/// Every method is called from a timer callback and should return quickly.
pub trait HostProbes: Send + Sync + 'static {
    /// Number of active I/O handles.
    fn active_handle_count(&self) -> usize;

    /// Number of in-flight requests.
    fn active_request_count(&self) -> usize;

    /// Current memory footprint.
    ///
    /// May fail transiently, e.g. under file descriptor exhaustion; the
    /// memory sampler then skips the cycle.
    fn memory_usage(&self) -> Result<MemoryUsage, ProbeError>;

    /// Current scheduler lag in milliseconds.
    fn event_loop_lag_ms(&self) -> f64;

    /// Called when a reporter with lag sampling enabled bootstraps.
    fn start(&self) {}

    /// Called when that reporter is destroyed.
    fn stop(&self) {}
}
