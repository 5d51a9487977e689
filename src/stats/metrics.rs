//! Statistics for the fan-out hub

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Point-in-time hub statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Current live subscribers
    pub active_connections: usize,
    /// Subscribers ever admitted to the live set
    pub total_registered: u64,
    /// Registrations turned away at capacity
    pub rejected: u64,
    /// Subscribers removed from the live set, any reason
    pub total_unregistered: u64,
    /// Subscribers removed because their queue was full
    pub slow_consumer_drops: u64,
    /// Subscribers removed by the expiry sweep
    pub expired: u64,
    /// Broadcast passes run
    pub messages_broadcast: u64,
    /// Frames accepted into subscriber queues
    pub frames_delivered: u64,
    /// Subscribers skipped because the namespace did not match
    pub frames_filtered: u64,
    /// Connections built from scratch by the pool
    pub pool_allocated: u64,
    /// Connections reused from the pool
    pub pool_reused: u64,
    /// Time since the hub was created
    pub uptime: Duration,
}

impl HubStats {
    /// Mean frames delivered per broadcast
    pub fn average_fanout(&self) -> f64 {
        if self.messages_broadcast == 0 {
            0.0
        } else {
            self.frames_delivered as f64 / self.messages_broadcast as f64
        }
    }
}

/// Lock-free counters behind [`HubStats`]
#[derive(Debug)]
pub struct HubCounters {
    started_at: Instant,
    pub(crate) active: AtomicUsize,
    pub(crate) registered: AtomicU64,
    pub(crate) rejected: AtomicU64,
    pub(crate) unregistered: AtomicU64,
    pub(crate) slow_consumer_drops: AtomicU64,
    pub(crate) expired: AtomicU64,
    pub(crate) broadcasts: AtomicU64,
    pub(crate) delivered: AtomicU64,
    pub(crate) filtered: AtomicU64,
}

impl HubCounters {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            active: AtomicUsize::new(0),
            registered: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            unregistered: AtomicU64::new(0),
            slow_consumer_drops: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
        }
    }

    /// Current active count
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Take a snapshot
    pub fn snapshot(&self) -> HubStats {
        HubStats {
            active_connections: self.active(),
            total_registered: self.registered.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            total_unregistered: self.unregistered.load(Ordering::Relaxed),
            slow_consumer_drops: self.slow_consumer_drops.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            messages_broadcast: self.broadcasts.load(Ordering::Relaxed),
            frames_delivered: self.delivered.load(Ordering::Relaxed),
            frames_filtered: self.filtered.load(Ordering::Relaxed),
            pool_allocated: 0,
            pool_reused: 0,
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for HubCounters {
    fn default() -> Self {
        Self::new()
    }
}
