//! Process-wide garbage collection event bridge.
//!
//! A native GC notification hook can be installed only once per process,
//! while any number of reporters want its events. The [`GcBridge`] installs
//! the hook lazily on first use, classifies every raw notification into a
//! [`GcSample`] and hands it to all current subscribers.
//!
//! Rust has no collector of its own, so the default [`GcSource`] installs
//! nothing. Hosts embedding a garbage collected runtime either provide a
//! `GcSource` or forward notifications through [`GcBridge::publish`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::error::{ConfigError, GcBridgeError};
use crate::protocol::{GcSample, RawGcStats};

/// Subscriber capacity of the process-wide bridge.
pub const DEFAULT_GC_SUBSCRIBER_CAPACITY: usize = 100;

/// Receives raw notifications from a native GC hook.
pub type GcHook = Arc<dyn Fn(RawGcStats) + Send + Sync + 'static>;

/// Receives classified GC samples.
pub type GcListener = Arc<dyn Fn(&GcSample) + Send + Sync + 'static>;

/// A native source of GC notifications.
pub trait GcSource: Send + Sync + 'static {
    /// Installs `hook` so it is called after every collection.
    ///
    /// Called at most once per bridge.
    fn install(&self, hook: GcHook);
}

/// A source that never reports anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopGcSource;

impl GcSource for NoopGcSource {
    fn install(&self, _hook: GcHook) {}
}

/// Identifies one subscription on a [`GcBridge`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GcSubscription(u64);

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    listeners: BTreeMap<u64, GcListener>,
}

lazy_static::lazy_static! {
    static ref PROCESS_GC_BRIDGE: Arc<GcBridge> =
        Arc::new(GcBridge::new_unchecked(DEFAULT_GC_SUBSCRIBER_CAPACITY));
}

/// Fans GC notifications out to a bounded set of subscribers.
pub struct GcBridge {
    capacity: usize,
    installed: AtomicBool,
    subscribers: Mutex<Subscribers>,
}

impl GcBridge {
    /// The process-wide bridge all reporters share by default.
    pub fn global() -> Arc<GcBridge> {
        PROCESS_GC_BRIDGE.clone()
    }

    /// Creates an independent bridge with room for `capacity` subscribers.
    pub fn with_capacity(capacity: usize) -> Result<Arc<GcBridge>, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        Ok(Arc::new(GcBridge::new_unchecked(capacity)))
    }

    fn new_unchecked(capacity: usize) -> GcBridge {
        GcBridge {
            capacity,
            installed: AtomicBool::new(false),
            subscribers: Mutex::new(Subscribers::default()),
        }
    }

    /// Maximum number of concurrent subscribers.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Whether a native hook has been installed.
    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    /// Installs this bridge's hook into `source` unless a hook is already in
    /// place. Returns whether this call installed it.
    pub fn install(self: &Arc<Self>, source: &dyn GcSource) -> bool {
        if self
            .installed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let bridge: Weak<GcBridge> = Arc::downgrade(self);
        source.install(Arc::new(move |raw: RawGcStats| {
            if let Some(bridge) = bridge.upgrade() {
                bridge.publish(raw);
            }
        }));
        log::debug!("GC notification hook installed");
        true
    }

    /// Adds a listener.
    ///
    /// Fails once `capacity` listeners are subscribed; this points at
    /// reporters that are never destroyed.
    pub fn subscribe(&self, listener: GcListener) -> Result<GcSubscription, GcBridgeError> {
        let mut subscribers = self.lock();
        if subscribers.listeners.len() >= self.capacity {
            log::warn!(
                "rejecting GC subscriber: {} of {} slots in use",
                subscribers.listeners.len(),
                self.capacity
            );
            return Err(GcBridgeError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        subscribers.next_id += 1;
        let id = subscribers.next_id;
        subscribers.listeners.insert(id, listener);
        Ok(GcSubscription(id))
    }

    /// Removes a listener. Returns whether it was subscribed.
    pub fn unsubscribe(&self, subscription: GcSubscription) -> bool {
        let removed = self.lock().listeners.remove(&subscription.0);
        removed.is_some()
    }

    /// Classifies a raw notification and delivers it to every subscriber.
    ///
    /// Listeners are called outside the lock on a snapshot of the
    /// subscriber set, so they may subscribe or unsubscribe freely.
    pub fn publish(&self, raw: RawGcStats) {
        let sample = GcSample::from(raw);
        let listeners: Vec<GcListener> = self.lock().listeners.values().cloned().collect();
        for listener in listeners {
            listener(&sample);
        }
    }

    /// Drops every subscriber and forgets the installed hook.
    ///
    /// Only meant for tests that share the process-wide bridge; a real
    /// native hook cannot be uninstalled.
    #[doc(hidden)]
    pub fn reset_for_testing(&self) {
        self.lock().listeners.clear();
        self.installed.store(false, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for GcBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcBridge")
            .field("capacity", &self.capacity)
            .field("installed", &self.is_installed())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
