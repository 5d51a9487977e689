//! Hub configuration

use std::time::Duration;

/// Hub configuration options
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum live subscribers; registrations beyond this are rejected (0 = unlimited)
    pub max_connections: usize,

    /// Outgoing queue slots per subscriber
    pub queue_capacity: usize,

    /// Subscribers idle longer than this are removed by the sweep
    pub inactivity_timeout: Duration,

    /// How often the expiry sweep runs
    pub sweep_interval: Duration,

    /// How often the observer receives a status report
    pub status_interval: Duration,

    /// Buffered register requests before `register` waits
    pub register_capacity: usize,

    /// Buffered broadcasts before `broadcast` waits
    pub broadcast_capacity: usize,

    /// Emit a `namespace:` line in encoded frames
    pub advertise_namespace: bool,

    /// Idle connections kept by the pool for reuse
    pub pool_max_idle: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            queue_capacity: 256,
            inactivity_timeout: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            status_interval: Duration::from_secs(5 * 60),
            register_capacity: 1024,
            broadcast_capacity: 1024,
            advertise_namespace: true,
            pool_max_idle: 1024,
        }
    }
}

impl HubConfig {
    /// Set maximum live subscribers
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set per-subscriber queue capacity (at least 1)
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set inactivity timeout
    pub fn inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    /// Set expiry sweep interval
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set status report interval
    pub fn status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    /// Set broadcast ingress capacity (at least 1)
    pub fn broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity.max(1);
        self
    }

    /// Set register ingress capacity (at least 1)
    pub fn register_capacity(mut self, capacity: usize) -> Self {
        self.register_capacity = capacity.max(1);
        self
    }

    /// Omit the `namespace:` line from encoded frames
    pub fn hide_namespace(mut self) -> Self {
        self.advertise_namespace = false;
        self
    }

    /// Set the number of idle connections the pool keeps
    pub fn pool_max_idle(mut self, max: usize) -> Self {
        self.pool_max_idle = max;
        self
    }
}
