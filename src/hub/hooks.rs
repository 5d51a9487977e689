//! Lifecycle hooks and the hub observer
//!
//! Hooks let an upstream source produce only while someone is listening.
//! The observer is the single place the hub reports what it does; the
//! default one turns reports into `tracing` events.

use std::fmt;
use std::sync::Arc;

use super::connection::ConnectionId;
use crate::stats::HubStats;

/// Zero-argument callback run on the hub's event loop
///
/// Hooks must return quickly and must not wait on the hub.
pub type Hook = Arc<dyn Fn() + Send + Sync>;

/// Callbacks for the zero/non-zero transitions of the active count
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    pub(super) on_first_subscriber: Option<Hook>,
    pub(super) on_last_subscriber_gone: Option<Hook>,
}

impl LifecycleHooks {
    /// No hooks
    pub fn new() -> Self {
        Self::default()
    }

    /// Run when the active count goes from 0 to 1
    pub fn on_first_subscriber<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_first_subscriber = Some(Arc::new(f));
        self
    }

    /// Run when the active count drops back to 0
    pub fn on_last_subscriber_gone<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_last_subscriber_gone = Some(Arc::new(f));
        self
    }

    /// Chain another set of hooks after these ones
    pub fn and_then(self, next: LifecycleHooks) -> Self {
        Self {
            on_first_subscriber: chain(self.on_first_subscriber, next.on_first_subscriber),
            on_last_subscriber_gone: chain(
                self.on_last_subscriber_gone,
                next.on_last_subscriber_gone,
            ),
        }
    }
}

fn chain(first: Option<Hook>, second: Option<Hook>) -> Option<Hook> {
    match (first, second) {
        (Some(a), Some(b)) => Some(Arc::new(move || {
            a();
            b();
        })),
        (a, None) => a,
        (None, b) => b,
    }
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("on_first_subscriber", &self.on_first_subscriber.is_some())
            .field(
                "on_last_subscriber_gone",
                &self.on_last_subscriber_gone.is_some(),
            )
            .finish()
    }
}

/// Why a connection left the live set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisterReason {
    /// The transport asked (client went away)
    Requested,
    /// Outgoing queue was full during a broadcast
    SlowConsumer,
    /// Reader side of the queue was dropped
    ReaderGone,
    /// Idle past the inactivity timeout
    Expired,
    /// Hub shutdown
    Shutdown,
}

impl fmt::Display for UnregisterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnregisterReason::Requested => "requested",
            UnregisterReason::SlowConsumer => "slow_consumer",
            UnregisterReason::ReaderGone => "reader_gone",
            UnregisterReason::Expired => "expired",
            UnregisterReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Receives reports from the hub's event loop
///
/// All methods default to doing nothing. Implementations run inline on the
/// event loop, so they must not block.
pub trait HubObserver: Send + Sync + 'static {
    /// A connection joined the live set
    fn on_register(&self, _id: ConnectionId, _namespace: &str, _active: usize) {}

    /// A connection was turned away at capacity
    fn on_reject(&self, _id: ConnectionId, _max_connections: usize) {}

    /// A connection left the live set
    fn on_unregister(&self, _id: ConnectionId, _reason: UnregisterReason, _active: usize) {}

    /// A broadcast pass finished
    fn on_broadcast(&self, _namespace: &str, _delivered: usize, _dropped: usize) {}

    /// An expiry sweep finished
    fn on_sweep(&self, _expired: usize, _active: usize) {}

    /// A lifecycle hook panicked
    fn on_hook_panic(&self, _hook: &'static str) {}

    /// Periodic status report
    fn on_status(&self, _stats: &HubStats) {}

    /// The hub finished shutting down
    fn on_shutdown(&self, _closed: usize) {}
}

/// Observer that discards every report
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl HubObserver for NoopObserver {}

/// Observer that logs through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl HubObserver for TracingObserver {
    fn on_register(&self, id: ConnectionId, namespace: &str, active: usize) {
        tracing::debug!(
            conn = %id,
            namespace = namespace,
            active = active,
            "Subscriber registered"
        );
    }

    fn on_reject(&self, id: ConnectionId, max_connections: usize) {
        tracing::warn!(
            conn = %id,
            max_connections = max_connections,
            "Subscriber rejected: connection limit reached"
        );
    }

    fn on_unregister(&self, id: ConnectionId, reason: UnregisterReason, active: usize) {
        match reason {
            UnregisterReason::SlowConsumer => {
                tracing::warn!(conn = %id, active = active, "Slow subscriber dropped");
            }
            _ => {
                tracing::debug!(
                    conn = %id,
                    reason = %reason,
                    active = active,
                    "Subscriber unregistered"
                );
            }
        }
    }

    fn on_broadcast(&self, namespace: &str, delivered: usize, dropped: usize) {
        tracing::trace!(
            namespace = namespace,
            delivered = delivered,
            dropped = dropped,
            "Broadcast complete"
        );
    }

    fn on_sweep(&self, expired: usize, active: usize) {
        if expired > 0 {
            tracing::info!(expired = expired, active = active, "Expired subscribers removed");
        }
    }

    fn on_hook_panic(&self, hook: &'static str) {
        tracing::error!(hook = hook, "Lifecycle hook panicked");
    }

    fn on_status(&self, stats: &HubStats) {
        tracing::info!(
            active = stats.active_connections,
            registered = stats.total_registered,
            broadcasts = stats.messages_broadcast,
            slow_drops = stats.slow_consumer_drops,
            "Hub status"
        );
    }

    fn on_shutdown(&self, closed: usize) {
        tracing::info!(closed = closed, "Hub stopped");
    }
}
