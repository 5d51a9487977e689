//! Recycling for connections and scratch buffers
//!
//! Under heavy connect/disconnect churn the hub would otherwise allocate a
//! connection, a queue and two scratch vectors per subscriber and per
//! broadcast. Pooled objects are always reset before reuse.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use super::connection::{Connection, ConnectionId, Subscription};

/// Connection pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections built from scratch
    pub allocated: u64,
    /// Connections handed out again after recycling
    pub reused: u64,
    /// Connections returned to the idle list
    pub recycled: u64,
}

/// Free list of connections
///
/// Also the source of connection ids: every lifetime gets a new one.
pub struct ConnectionPool {
    idle: Mutex<Vec<Connection>>,
    max_idle: usize,
    next_id: AtomicU64,
    allocated: AtomicU64,
    reused: AtomicU64,
    recycled: AtomicU64,
}

impl ConnectionPool {
    /// Create a pool that keeps at most `max_idle` connections
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
            next_id: AtomicU64::new(1),
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            recycled: AtomicU64::new(0),
        }
    }

    /// Get a connection (recycled or new) reset for a new lifetime
    pub(super) fn acquire(
        &self,
        namespace: &str,
        capacity: usize,
        hub_link: mpsc::UnboundedSender<ConnectionId>,
    ) -> (Connection, mpsc::Receiver<bytes::Bytes>) {
        let recycled = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        let mut conn = match recycled {
            Some(conn) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                conn
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Connection::empty()
            }
        };

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let rx = conn.reset(id, namespace, capacity, hub_link);
        (conn, rx)
    }

    /// Get a ready-to-register subscription
    pub(super) fn subscription(
        self: &Arc<Self>,
        namespace: &str,
        capacity: usize,
        hub_link: mpsc::UnboundedSender<ConnectionId>,
    ) -> Subscription {
        let (conn, rx) = self.acquire(namespace, capacity, hub_link);
        Subscription::new(Arc::new(conn), rx, Arc::clone(self))
    }

    /// Return a connection if this was the last reference to it
    ///
    /// Callers only recycle after the connection has left the live set, so a
    /// connection a subscriber still reads from is never handed out again.
    pub fn recycle(&self, conn: Arc<Connection>) -> bool {
        let Some(mut conn) = Arc::into_inner(conn) else {
            return false;
        };

        conn.close();
        conn.clear();

        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() >= self.max_idle {
            return false;
        }
        idle.push(conn);
        self.recycled.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Connections waiting for reuse
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Pool counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            recycled: self.recycled.load(Ordering::Relaxed),
        }
    }
}

/// Pool of scratch vectors
///
/// Returned vectors are cleared; oversized ones are dropped so a single huge
/// burst does not pin memory forever.
pub struct BufferPool<T> {
    free: Mutex<Vec<Vec<T>>>,
    max_pooled: usize,
    initial_capacity: usize,
    max_retained_capacity: usize,
}

impl<T> BufferPool<T> {
    /// Create a buffer pool
    pub fn new(max_pooled: usize, initial_capacity: usize, max_retained_capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_pooled,
            initial_capacity,
            max_retained_capacity,
        }
    }

    /// Get an empty buffer
    pub fn take(&self) -> Vec<T> {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.initial_capacity))
    }

    /// Return a buffer; its contents are dropped
    pub fn give(&self, mut buf: Vec<T>) {
        buf.clear();
        if buf.capacity() > self.max_retained_capacity {
            return;
        }

        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.max_pooled {
            free.push(buf);
        }
    }

    /// Buffers waiting for reuse
    pub fn pooled(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_assigns_fresh_ids() {
        let pool = ConnectionPool::new(4);
        let (link, _) = mpsc::unbounded_channel();

        let (a, _rx_a) = pool.acquire("", 1, link.clone());
        let (b, _rx_b) = pool.acquire("", 1, link);

        assert_ne!(a.id(), b.id());
        assert_eq!(pool.stats().allocated, 2);
    }

    #[test]
    fn test_recycle_and_reuse() {
        let pool = ConnectionPool::new(4);
        let (link, _) = mpsc::unbounded_channel();

        let (conn, _rx) = pool.acquire("/a", 1, link.clone());
        let first_id = conn.id();
        assert!(pool.recycle(Arc::new(conn)));
        assert_eq!(pool.idle_count(), 1);

        let (conn, mut rx) = pool.acquire("/b", 1, link);
        assert_ne!(conn.id(), first_id);
        assert_eq!(conn.namespace(), "/b");
        assert!(!conn.is_closed());
        assert!(conn.close());
        assert!(rx.try_recv().is_err());

        let stats = pool.stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.recycled, 1);
    }

    #[test]
    fn test_recycle_skips_shared_connections() {
        let pool = ConnectionPool::new(4);
        let (link, _) = mpsc::unbounded_channel();

        let (conn, _rx) = pool.acquire("", 1, link);
        let conn = Arc::new(conn);
        let other = Arc::clone(&conn);

        assert!(!pool.recycle(conn));
        assert_eq!(pool.idle_count(), 0);
        assert!(!other.is_closed());
    }

    #[test]
    fn test_recycle_respects_max_idle() {
        let pool = ConnectionPool::new(1);
        let (link, _) = mpsc::unbounded_channel();

        let (a, _rx_a) = pool.acquire("", 1, link.clone());
        let (b, _rx_b) = pool.acquire("", 1, link);

        assert!(pool.recycle(Arc::new(a)));
        assert!(!pool.recycle(Arc::new(b)));
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_buffer_pool_reuses_cleared_buffers() {
        let pool: BufferPool<u32> = BufferPool::new(2, 8, 64);

        let mut buf = pool.take();
        buf.extend([1, 2, 3]);
        pool.give(buf);
        assert_eq!(pool.pooled(), 1);

        let buf = pool.take();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 8);
    }

    #[test]
    fn test_buffer_pool_drops_oversized() {
        let pool: BufferPool<u32> = BufferPool::new(2, 8, 16);

        pool.give(Vec::with_capacity(1024));
        assert_eq!(pool.pooled(), 0);
    }
}
