//! Per-subscriber connection state
//!
//! A [`Connection`] is shared between the hub (which owns its membership in
//! the live set) and the transport's [`Subscription`] (which drains its
//! outgoing queue). Either side may close it; the queue is closed once.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;

use super::pool::ConnectionPool;

/// Identity of one connection lifetime
///
/// A recycled connection gets a fresh id, so a late unregister aimed at a
/// previous lifetime never removes the new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(super) u64);

impl ConnectionId {
    /// Raw numeric id
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Result of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Frame accepted into the outgoing queue
    Queued,
    /// Connection already closed, frame dropped
    Closed,
    /// Outgoing queue full (slow consumer)
    Full,
    /// The reader side is gone
    Disconnected,
}

/// One subscriber's hub-side state
pub struct Connection {
    id: ConnectionId,
    namespace: String,
    created_at: Instant,
    /// Microseconds since `created_at` of the last activity
    last_activity_us: AtomicU64,
    closed: AtomicBool,
    sender: Mutex<Option<mpsc::Sender<Bytes>>>,
    /// Unregister ingress of the owning hub
    hub_link: Option<mpsc::UnboundedSender<ConnectionId>>,
}

impl Connection {
    /// A closed connection with no queue, ready to be reset
    pub(super) fn empty() -> Self {
        Self {
            id: ConnectionId(0),
            namespace: String::new(),
            created_at: Instant::now(),
            last_activity_us: AtomicU64::new(0),
            closed: AtomicBool::new(true),
            sender: Mutex::new(None),
            hub_link: None,
        }
    }

    /// Start a new lifetime: fresh queue, cleared guard, refreshed clock
    pub(super) fn reset(
        &mut self,
        id: ConnectionId,
        namespace: &str,
        capacity: usize,
        hub_link: mpsc::UnboundedSender<ConnectionId>,
    ) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        self.id = id;
        self.namespace.clear();
        self.namespace.push_str(namespace);
        self.created_at = Instant::now();
        *self.last_activity_us.get_mut() = 0;
        *self.closed.get_mut() = false;
        *self.sender.get_mut().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        self.hub_link = Some(hub_link);

        rx
    }

    /// Drop everything tied to the finished lifetime
    pub(super) fn clear(&mut self) {
        *self.closed.get_mut() = true;
        *self.sender.get_mut().unwrap_or_else(PoisonError::into_inner) = None;
        self.hub_link = None;
        self.namespace.clear();
    }

    /// Connection id for this lifetime
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Namespace filter (empty = everything)
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// When this lifetime started
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Last recorded activity
    pub fn last_activity(&self) -> Instant {
        self.created_at + Duration::from_micros(self.last_activity_us.load(Ordering::Relaxed))
    }

    /// Record activity now
    pub fn touch(&self) {
        let elapsed = self.created_at.elapsed().as_micros() as u64;
        self.last_activity_us.fetch_max(elapsed, Ordering::Relaxed);
    }

    /// Time since the last recorded activity
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_micros(self.last_activity_us.load(Ordering::Relaxed));
        self.created_at.elapsed().saturating_sub(last)
    }

    /// Whether the connection has been idle longer than `timeout`
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.idle_for() > timeout
    }

    /// Prefix match of a message namespace against this subscription
    ///
    /// An empty subscription receives everything, and a message without a
    /// namespace goes to every subscriber.
    pub fn accepts(&self, namespace: &str) -> bool {
        self.namespace.is_empty() || namespace.is_empty() || namespace.starts_with(&self.namespace)
    }

    /// Push an encoded frame without waiting
    ///
    /// Successful enqueues count as activity.
    pub fn enqueue(&self, frame: Bytes) -> EnqueueOutcome {
        if self.closed.load(Ordering::Acquire) {
            return EnqueueOutcome::Closed;
        }

        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = sender.as_ref() else {
            return EnqueueOutcome::Closed;
        };

        match tx.try_send(frame) {
            Ok(()) => {
                self.touch();
                EnqueueOutcome::Queued
            }
            Err(mpsc::error::TrySendError::Full(_)) => EnqueueOutcome::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => EnqueueOutcome::Disconnected,
        }
    }

    /// Close the outgoing queue
    ///
    /// Returns `true` only for the call that actually closed it. The reader
    /// still drains frames queued before the close, then sees end-of-stream.
    pub fn close(&self) -> bool {
        let mut sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        sender.take();
        true
    }

    /// Whether the connection has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Ask the owning hub to remove this connection
    ///
    /// Returns `false` when there is no hub to ask (released or hub stopped).
    pub fn unsubscribe(&self) -> bool {
        match self.hub_link {
            Some(ref link) => link.send(self.id).is_ok(),
            None => false,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("namespace", &self.namespace)
            .field("closed", &self.is_closed())
            .field("idle_for", &self.idle_for())
            .finish()
    }
}

/// Transport-side handle for one subscriber
///
/// Dropping it closes the connection, asks the hub to unregister it and
/// hands it back to the pool once no one else references it.
pub struct Subscription {
    conn: Option<Arc<Connection>>,
    frames: mpsc::Receiver<Bytes>,
    pool: Arc<ConnectionPool>,
}

impl Subscription {
    pub(super) fn new(
        conn: Arc<Connection>,
        frames: mpsc::Receiver<Bytes>,
        pool: Arc<ConnectionPool>,
    ) -> Self {
        Self {
            conn: Some(conn),
            frames,
            pool,
        }
    }

    fn conn(&self) -> &Arc<Connection> {
        match self.conn {
            Some(ref conn) => conn,
            None => unreachable!("subscription used after release"),
        }
    }

    /// Connection id
    pub fn id(&self) -> ConnectionId {
        self.conn().id()
    }

    /// Namespace this subscription filters on
    pub fn namespace(&self) -> &str {
        self.conn().namespace()
    }

    /// Shared connection, for registering with the hub
    pub fn connection(&self) -> Arc<Connection> {
        Arc::clone(self.conn())
    }

    /// Wait for the next frame; `None` once the connection is closed and drained
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.frames.recv().await
    }

    /// Poll for the next frame
    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.frames.poll_recv(cx)
    }

    /// Take a queued frame if one is ready
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.frames.try_recv().ok()
    }

    /// Record inbound liveness from the transport
    pub fn record_activity(&self) {
        self.conn().touch();
    }

    /// Whether the hub (or anyone) has closed this connection
    pub fn is_closed(&self) -> bool {
        self.conn().is_closed()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("connection", &self.conn)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close();
            conn.unsubscribe();
            self.pool.recycle(conn);
        }
    }
}
