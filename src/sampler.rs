//! One sampling step per metric family.

use crate::cache::SampleCache;
use crate::probes::HostProbes;
use crate::protocol::{Family, MemoryUsage};
use crate::sink::SinkAdapter;

/// Everything a sampling step reads from or writes to.
pub(crate) struct Sampler<'a> {
    pub(crate) probes: &'a dyn HostProbes,
    pub(crate) sink: &'a SinkAdapter,
    pub(crate) cache: &'a SampleCache,
}

impl Sampler<'_> {
    /// Runs the step of a periodic family. GC is event driven and ignored.
    pub(crate) fn sample(&self, family: Family) {
        match family {
            Family::Handle => self.sample_handles(),
            Family::Request => self.sample_requests(),
            Family::Memory => {
                self.sample_memory();
            }
            Family::Lag => self.sample_lag(),
            Family::Gc => {}
        }
    }

    pub(crate) fn sample_handles(&self) {
        self.sink.report_handles(self.probes.active_handle_count());
    }

    pub(crate) fn sample_requests(&self) {
        self.sink.report_requests(self.probes.active_request_count());
    }

    /// Reads, caches and reports memory usage.
    ///
    /// A failed read skips the cycle: nothing is emitted and the cached
    /// value is left alone.
    pub(crate) fn sample_memory(&self) -> Option<MemoryUsage> {
        let usage = match self.probes.memory_usage() {
            Ok(usage) => usage,
            Err(err) => {
                log::debug!("skipping memory sample: {err}");
                return None;
            }
        };
        self.cache.store_memory(usage);
        self.sink.report_memory(&usage);
        Some(usage)
    }

    pub(crate) fn sample_lag(&self) {
        let lag = self.probes.event_loop_lag_ms();
        self.cache.store_lag(lag);
        self.sink.report_lag(lag);
    }
}
