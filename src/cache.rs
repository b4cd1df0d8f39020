//! Last-value cache for memory and lag readings.

use std::sync::{PoisonError, RwLock};

use crate::protocol::MemoryUsage;

/// Holds the most recent memory and lag values.
///
/// Both start absent. A value is replaced only by a newer successful
/// sample; failed samples leave the previous value in place.
#[derive(Debug, Default)]
pub(crate) struct SampleCache {
    memory: RwLock<Option<MemoryUsage>>,
    lag_ms: RwLock<Option<f64>>,
}

impl SampleCache {
    pub(crate) fn memory(&self) -> Option<MemoryUsage> {
        *self.memory.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lag_ms(&self) -> Option<f64> {
        *self.lag_ms.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn store_memory(&self, usage: MemoryUsage) {
        *self.memory.write().unwrap_or_else(PoisonError::into_inner) = Some(usage);
    }

    pub(crate) fn store_lag(&self, lag_ms: f64) {
        *self.lag_ms.write().unwrap_or_else(PoisonError::into_inner) = Some(lag_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_starts_empty_and_keeps_latest() {
        let cache = SampleCache::default();
        assert_eq!(cache.memory(), None);
        assert_eq!(cache.lag_ms(), None);

        cache.store_lag(3.0);
        cache.store_lag(4.0);
        assert_eq!(cache.lag_ms(), Some(4.0));

        let usage = MemoryUsage {
            rss: 1.0,
            heap_used: 2.0,
            heap_total: 3.0,
        };
        cache.store_memory(usage);
        assert_eq!(cache.memory(), Some(usage));
    }
}
