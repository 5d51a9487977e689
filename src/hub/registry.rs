//! Hub implementation
//!
//! One event loop task owns the live set. Register, unregister, broadcast,
//! the expiry sweep and shutdown are all handled on that task, so the set
//! itself needs no lock and every broadcast sees either all or none of a
//! given registration.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::config::HubConfig;
use super::connection::{Connection, ConnectionId, EnqueueOutcome, Subscription};
use super::error::HubError;
use super::hooks::{Hook, HubObserver, LifecycleHooks, TracingObserver, UnregisterReason};
use super::message::SseMessage;
use super::pool::{BufferPool, ConnectionPool};
use crate::stats::{HubCounters, HubStats};

/// Scratch vectors kept per buffer pool
const SCRATCH_POOLED: usize = 4;
/// Initial scratch vector capacity
const SCRATCH_CAPACITY: usize = 128;
/// Scratch vectors above this capacity are not kept
const SCRATCH_MAX_RETAINED: usize = 16 * 1024;
/// Floor for the sweep and status intervals
const MIN_TICK: Duration = Duration::from_millis(1);

/// Handle to the fan-out hub
///
/// Cheap to clone; all clones talk to the same event loop. The loop also
/// shuts down once every handle is dropped.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: HubConfig,
    register_tx: mpsc::Sender<Arc<Connection>>,
    unregister_tx: mpsc::UnboundedSender<ConnectionId>,
    broadcast_tx: mpsc::Sender<SseMessage>,
    stop_tx: watch::Sender<bool>,
    stopped: AtomicBool,
    counters: Arc<HubCounters>,
    pool: Arc<ConnectionPool>,
    event_loop: Mutex<Option<EventLoop>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Hub {
    /// Create a hub that reports through `tracing`
    pub fn new(config: HubConfig, hooks: LifecycleHooks) -> Self {
        Self::with_observer(config, hooks, Arc::new(TracingObserver))
    }

    /// Create a hub with a custom observer
    ///
    /// Nothing runs until [`Hub::start`] is called.
    pub fn with_observer(
        config: HubConfig,
        hooks: LifecycleHooks,
        observer: Arc<dyn HubObserver>,
    ) -> Self {
        let (register_tx, register_rx) = mpsc::channel(config.register_capacity.max(1));
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_capacity.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);

        let counters = Arc::new(HubCounters::new());
        let pool = Arc::new(ConnectionPool::new(config.pool_max_idle));

        let event_loop = EventLoop {
            ingress: Ingress {
                register: register_rx,
                unregister: unregister_rx,
                broadcast: broadcast_rx,
                stop: stop_rx,
            },
            state: HubState {
                config: config.clone(),
                connections: HashMap::new(),
                hooks,
                observer,
                counters: Arc::clone(&counters),
                pool: Arc::clone(&pool),
                snapshots: BufferPool::new(SCRATCH_POOLED, SCRATCH_CAPACITY, SCRATCH_MAX_RETAINED),
                dropped: BufferPool::new(SCRATCH_POOLED, SCRATCH_CAPACITY, SCRATCH_MAX_RETAINED),
                upstream_running: false,
            },
        };

        Self {
            inner: Arc::new(HubInner {
                config,
                register_tx,
                unregister_tx,
                broadcast_tx,
                stop_tx,
                stopped: AtomicBool::new(false),
                counters,
                pool,
                event_loop: Mutex::new(Some(event_loop)),
                task: Mutex::new(None),
            }),
        }
    }

    /// Spawn the event loop
    ///
    /// Must be called from within a Tokio runtime. Returns `false` if the
    /// hub was already started or has been stopped.
    pub fn start(&self) -> bool {
        if self.is_stopped() {
            return false;
        }

        let event_loop = self
            .inner
            .event_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match event_loop {
            Some(event_loop) => {
                let handle = tokio::spawn(event_loop.run());
                *self.inner.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                tracing::debug!(
                    max_connections = self.inner.config.max_connections,
                    queue_capacity = self.inner.config.queue_capacity,
                    "Hub started"
                );
                true
            }
            None => false,
        }
    }

    /// Get the hub configuration
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Create a subscriber connection without registering it
    ///
    /// The connection comes from the pool, reset with a fresh queue.
    pub fn connect(&self, namespace: &str) -> Subscription {
        self.inner.pool.subscription(
            namespace,
            self.inner.config.queue_capacity,
            self.inner.unregister_tx.clone(),
        )
    }

    /// Create and register a subscriber in one step
    pub async fn subscribe(&self, namespace: &str) -> Result<Subscription, HubError> {
        let subscription = self.connect(namespace);
        self.register(subscription.connection()).await?;
        Ok(subscription)
    }

    /// Hand a connection to the hub
    ///
    /// Waits only if the register queue is full. On error the connection
    /// has been closed, so its reader sees end-of-stream.
    pub async fn register(&self, conn: Arc<Connection>) -> Result<(), HubError> {
        if self.is_stopped() {
            conn.close();
            return Err(HubError::Stopped);
        }

        self.inner.register_tx.send(conn).await.map_err(|e| {
            e.0.close();
            HubError::Stopped
        })
    }

    /// Hand a connection to the hub without waiting
    pub fn try_register(&self, conn: Arc<Connection>) -> Result<(), HubError> {
        if self.is_stopped() {
            conn.close();
            return Err(HubError::Stopped);
        }

        self.inner.register_tx.try_send(conn).map_err(|e| match e {
            mpsc::error::TrySendError::Full(conn) => {
                conn.close();
                HubError::QueueFull
            }
            mpsc::error::TrySendError::Closed(conn) => {
                conn.close();
                HubError::Stopped
            }
        })
    }

    /// Ask the hub to remove a connection
    ///
    /// Never waits. Unknown or already removed ids are ignored.
    pub fn unregister(&self, id: ConnectionId) {
        let _ = self.inner.unregister_tx.send(id);
    }

    /// Publish a message to every matching subscriber
    ///
    /// Waits only while the broadcast queue is full, never on a subscriber.
    pub async fn broadcast(&self, message: SseMessage) -> Result<(), HubError> {
        if self.is_stopped() {
            return Err(HubError::Stopped);
        }

        self.inner
            .broadcast_tx
            .send(message)
            .await
            .map_err(|_| HubError::Stopped)
    }

    /// Publish without waiting
    pub fn try_broadcast(&self, message: SseMessage) -> Result<(), HubError> {
        if self.is_stopped() {
            return Err(HubError::Stopped);
        }

        self.inner.broadcast_tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => HubError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => HubError::Stopped,
        })
    }

    /// Current number of live subscribers
    pub fn active_connection_count(&self) -> usize {
        self.inner.counters.active()
    }

    /// Snapshot of hub counters
    pub fn stats(&self) -> HubStats {
        let mut stats = self.inner.counters.snapshot();
        let pool = self.inner.pool.stats();
        stats.pool_allocated = pool.allocated;
        stats.pool_reused = pool.reused;
        stats
    }

    /// The connection pool backing this hub
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.inner.pool
    }

    /// Signal the event loop to stop
    ///
    /// Returns `true` for the first call only. Every live subscriber is
    /// unregistered (its stream ends) before the loop exits.
    pub fn stop(&self) -> bool {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.inner.stop_tx.send_replace(true);

        // Never started: drain on the caller's thread
        let pending = self
            .inner
            .event_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(event_loop) = pending {
            event_loop.shutdown();
        }

        true
    }

    /// Stop and wait for the event loop to finish
    pub async fn shutdown(&self) {
        self.stop();

        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Hub event loop failed");
            }
        }
    }

    /// Resolves once stop has been requested
    pub async fn stopped(&self) {
        let mut stop_rx = self.inner.stop_tx.subscribe();
        let _ = stop_rx.wait_for(|stopped| *stopped).await;
    }

    /// Whether stop has been requested
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("active", &self.active_connection_count())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

struct Ingress {
    register: mpsc::Receiver<Arc<Connection>>,
    unregister: mpsc::UnboundedReceiver<ConnectionId>,
    broadcast: mpsc::Receiver<SseMessage>,
    stop: watch::Receiver<bool>,
}

struct EventLoop {
    ingress: Ingress,
    state: HubState,
}

impl EventLoop {
    async fn run(mut self) {
        let sweep_every = self.state.config.sweep_interval.max(MIN_TICK);
        let status_every = self.state.config.status_interval.max(MIN_TICK);

        let mut sweep = time::interval_at(Instant::now() + sweep_every, sweep_every);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut status = time::interval_at(Instant::now() + status_every, status_every);
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                // Also fires when every hub handle has been dropped
                _ = self.ingress.stop.changed() => break,

                Some(id) = self.ingress.unregister.recv() => {
                    self.state.remove(id, UnregisterReason::Requested);
                }

                // Must stay above broadcast or a steady publisher starves the sweep
                _ = sweep.tick() => {
                    self.state.sweep();
                }

                _ = status.tick() => {
                    let stats = self.state.counters.snapshot();
                    self.state.observer.on_status(&stats);
                }

                Some(conn) = self.ingress.register.recv() => {
                    self.state.register(conn);
                }

                Some(message) = self.ingress.broadcast.recv() => {
                    self.state.broadcast(&message);
                }
            }
        }

        self.shutdown();
    }

    fn shutdown(mut self) {
        // Requests already queued are applied exactly once before the drain
        while let Ok(id) = self.ingress.unregister.try_recv() {
            self.state.remove(id, UnregisterReason::Requested);
        }

        // Registrations that never made it in still need their streams ended
        self.ingress.register.close();
        while let Ok(conn) = self.ingress.register.try_recv() {
            conn.close();
            self.state.pool.recycle(conn);
        }

        self.ingress.broadcast.close();

        let closed = self.state.remove_all(UnregisterReason::Shutdown);
        self.state.counters.active.store(0, Ordering::Release);
        self.state.observer.on_shutdown(closed);
    }
}

struct HubState {
    config: HubConfig,
    connections: HashMap<ConnectionId, Arc<Connection>>,
    hooks: LifecycleHooks,
    observer: Arc<dyn HubObserver>,
    counters: Arc<HubCounters>,
    pool: Arc<ConnectionPool>,
    snapshots: BufferPool<Arc<Connection>>,
    dropped: BufferPool<(ConnectionId, UnregisterReason)>,
    upstream_running: bool,
}

impl HubState {
    fn register(&mut self, conn: Arc<Connection>) {
        // Subscriber left before its registration was processed
        if conn.is_closed() {
            self.pool.recycle(conn);
            return;
        }

        let id = conn.id();
        if self.connections.contains_key(&id) {
            return;
        }

        let max = self.config.max_connections;
        if max > 0 && self.connections.len() >= max {
            conn.close();
            HubCounters::add(&self.counters.rejected, 1);
            self.observer.on_reject(id, max);
            self.pool.recycle(conn);
            return;
        }

        let namespace = conn.namespace().to_owned();
        self.connections.insert(id, conn);
        let active = self.connections.len();

        HubCounters::add(&self.counters.registered, 1);
        self.observer.on_register(id, &namespace, active);

        if active == 1 {
            self.start_upstream();
        }
        self.publish_active();
    }

    fn remove(&mut self, id: ConnectionId, reason: UnregisterReason) -> bool {
        let Some(conn) = self.connections.remove(&id) else {
            return false;
        };

        conn.close();
        let active = self.connections.len();

        HubCounters::add(&self.counters.unregistered, 1);
        match reason {
            UnregisterReason::SlowConsumer => {
                HubCounters::add(&self.counters.slow_consumer_drops, 1)
            }
            UnregisterReason::Expired => HubCounters::add(&self.counters.expired, 1),
            _ => {}
        }
        self.observer.on_unregister(id, reason, active);

        self.pool.recycle(conn);

        if active == 0 {
            self.stop_upstream();
        }
        self.publish_active();
        true
    }

    fn broadcast(&mut self, message: &SseMessage) {
        let frame = message.encode_frame(self.config.advertise_namespace);

        let mut snapshot = self.snapshots.take();
        snapshot.extend(self.connections.values().cloned());

        let mut dropped = self.dropped.take();
        let mut delivered = 0;
        let mut filtered = 0;

        for conn in &snapshot {
            if !conn.accepts(&message.namespace) {
                filtered += 1;
                continue;
            }

            match conn.enqueue(frame.clone()) {
                EnqueueOutcome::Queued => delivered += 1,
                EnqueueOutcome::Full => dropped.push((conn.id(), UnregisterReason::SlowConsumer)),
                EnqueueOutcome::Disconnected => {
                    dropped.push((conn.id(), UnregisterReason::ReaderGone))
                }
                EnqueueOutcome::Closed => dropped.push((conn.id(), UnregisterReason::Requested)),
            }
        }

        // Release snapshot references first so removed connections can be pooled
        self.snapshots.give(snapshot);

        HubCounters::add(&self.counters.broadcasts, 1);
        HubCounters::add(&self.counters.delivered, delivered);
        HubCounters::add(&self.counters.filtered, filtered);
        self.observer
            .on_broadcast(&message.namespace, delivered, dropped.len());

        for (id, reason) in dropped.drain(..) {
            self.remove(id, reason);
        }
        self.dropped.give(dropped);
    }

    fn sweep(&mut self) {
        let timeout = self.config.inactivity_timeout;

        let mut expired = self.dropped.take();
        expired.extend(
            self.connections
                .values()
                .filter(|conn| conn.is_expired(timeout))
                .map(|conn| (conn.id(), UnregisterReason::Expired)),
        );

        let count = expired.len();
        for (id, reason) in expired.drain(..) {
            self.remove(id, reason);
        }
        self.dropped.give(expired);

        self.observer.on_sweep(count, self.connections.len());
    }

    fn remove_all(&mut self, reason: UnregisterReason) -> usize {
        let mut ids = self.dropped.take();
        ids.extend(self.connections.keys().map(|id| (*id, reason)));

        let mut closed = 0;
        for (id, reason) in ids.drain(..) {
            if self.remove(id, reason) {
                closed += 1;
            }
        }
        self.dropped.give(ids);
        closed
    }

    /// Make the live-set size visible, after any hook for the transition ran
    fn publish_active(&self) {
        self.counters.active.store(self.connections.len(), Ordering::Release);
    }

    fn start_upstream(&mut self) {
        if self.upstream_running {
            return;
        }
        self.upstream_running = true;
        let hook = self.hooks.on_first_subscriber.clone();
        self.fire(hook, "on_first_subscriber");
    }

    fn stop_upstream(&mut self) {
        if !self.upstream_running {
            return;
        }
        self.upstream_running = false;
        let hook = self.hooks.on_last_subscriber_gone.clone();
        self.fire(hook, "on_last_subscriber_gone");
    }

    fn fire(&self, hook: Option<Hook>, name: &'static str) {
        if let Some(hook) = hook {
            if panic::catch_unwind(AssertUnwindSafe(|| hook())).is_err() {
                self.observer.on_hook_panic(name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    use bytes::Bytes;

    use super::*;

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        time::timeout(Duration::from_secs(3), async {
            while !condition() {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn next_frame(sub: &mut Subscription) -> Option<Bytes> {
        time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("timed out waiting for frame")
    }

    fn counting_hooks() -> (LifecycleHooks, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let first = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&first);
        let l = Arc::clone(&last);

        let hooks = LifecycleHooks::new()
            .on_first_subscriber(move || {
                f.fetch_add(1, Ordering::SeqCst);
            })
            .on_last_subscriber_gone(move || {
                l.fetch_add(1, Ordering::SeqCst);
            });

        (hooks, first, last)
    }

    fn started(config: HubConfig, hooks: LifecycleHooks) -> Hub {
        let hub = Hub::new(config, hooks);
        assert!(hub.start());
        hub
    }

    #[tokio::test]
    async fn test_register_and_broadcast() {
        let hub = started(HubConfig::default(), LifecycleHooks::new());
        let mut sub = hub.subscribe("").await.unwrap();
        wait_until(|| hub.active_connection_count() == 1).await;

        hub.broadcast(SseMessage::new("test", "Hello, World!", ""))
            .await
            .unwrap();

        let frame = next_frame(&mut sub).await.unwrap();
        assert_eq!(&frame[..], b"event:test\ndata:Hello, World!\n\n");
    }

    #[tokio::test]
    async fn test_start_twice() {
        let hub = started(HubConfig::default(), LifecycleHooks::new());
        assert!(!hub.start());
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_per_connection_order() {
        let hub = started(HubConfig::default(), LifecycleHooks::new());
        let mut sub = hub.subscribe("").await.unwrap();
        wait_until(|| hub.active_connection_count() == 1).await;

        for i in 0..10 {
            hub.broadcast(SseMessage::data(format!("{}", i))).await.unwrap();
        }

        for i in 0..10 {
            let frame = next_frame(&mut sub).await.unwrap();
            assert_eq!(frame, Bytes::from(format!("data:{}\n\n", i)));
        }
    }

    #[tokio::test]
    async fn test_hooks_fire_once_per_transition() {
        let (hooks, first, last) = counting_hooks();
        let hub = started(HubConfig::default(), hooks);

        let mut subs = Vec::new();
        for _ in 0..5 {
            subs.push(hub.subscribe("").await.unwrap());
        }
        wait_until(|| hub.active_connection_count() == 5).await;
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(last.load(Ordering::SeqCst), 0);

        subs.clear();
        wait_until(|| hub.active_connection_count() == 0).await;
        wait_until(|| last.load(Ordering::SeqCst) == 1).await;
        assert_eq!(first.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hooks_alternate_on_flapping() {
        let (hooks, first, last) = counting_hooks();
        let hub = started(HubConfig::default(), hooks);

        for round in 1..=3 {
            let sub = hub.subscribe("").await.unwrap();
            wait_until(|| hub.active_connection_count() == 1).await;
            assert_eq!(first.load(Ordering::SeqCst), round);

            drop(sub);
            wait_until(|| last.load(Ordering::SeqCst) == round).await;
            assert_eq!(first.load(Ordering::SeqCst), round);
        }
    }

    #[tokio::test]
    async fn test_panicking_hook_does_not_kill_hub() {
        let hooks = LifecycleHooks::new().on_first_subscriber(|| panic!("upstream failed"));
        let hub = started(HubConfig::default(), hooks);

        let mut sub = hub.subscribe("").await.unwrap();
        wait_until(|| hub.active_connection_count() == 1).await;

        hub.broadcast(SseMessage::data("still alive")).await.unwrap();
        assert!(next_frame(&mut sub).await.is_some());
    }

    #[tokio::test]
    async fn test_slow_consumer_isolation() {
        let hub = started(HubConfig::default().queue_capacity(1), LifecycleHooks::new());

        let mut slow = hub.subscribe("").await.unwrap();
        let mut fast = hub.subscribe("").await.unwrap();
        wait_until(|| hub.active_connection_count() == 2).await;

        hub.broadcast(SseMessage::data("one")).await.unwrap();
        assert_eq!(next_frame(&mut fast).await.unwrap(), Bytes::from("data:one\n\n"));

        // slow still holds "one", so this pass must drop it
        hub.broadcast(SseMessage::data("two")).await.unwrap();
        assert_eq!(next_frame(&mut fast).await.unwrap(), Bytes::from("data:two\n\n"));

        wait_until(|| hub.active_connection_count() == 1).await;
        assert!(slow.is_closed());
        assert!(!fast.is_closed());

        // The slow reader gets what was queued, then end-of-stream
        assert_eq!(next_frame(&mut slow).await.unwrap(), Bytes::from("data:one\n\n"));
        assert_eq!(next_frame(&mut slow).await, None);

        assert_eq!(hub.stats().slow_consumer_drops, 1);
    }

    #[tokio::test]
    async fn test_burst_isolates_single_slot_consumer() {
        let hub = started(HubConfig::default().queue_capacity(1), LifecycleHooks::new());
        let _slow = hub.subscribe("").await.unwrap();
        wait_until(|| hub.active_connection_count() == 1).await;

        for _ in 0..200 {
            hub.broadcast(SseMessage::new("burst", "payload", ""))
                .await
                .unwrap();
        }

        wait_until(|| hub.active_connection_count() == 0).await;
    }

    #[tokio::test]
    async fn test_namespace_filtering() {
        let hub = started(HubConfig::default().hide_namespace(), LifecycleHooks::new());
        let mut sub = hub.subscribe("/a/b").await.unwrap();
        wait_until(|| hub.active_connection_count() == 1).await;

        for ns in ["/a/x", "/z", "/a/b", "/a", "/a/b/c"] {
            hub.broadcast(SseMessage::new("", ns, ns)).await.unwrap();
        }
        hub.broadcast(SseMessage::data("end")).await.unwrap();

        let mut received = Vec::new();
        loop {
            let frame = next_frame(&mut sub).await.unwrap();
            if &frame[..] == b"data:end\n\n" {
                break;
            }
            received.push(frame);
        }

        assert_eq!(
            received,
            vec![Bytes::from("data:/a/b\n\n"), Bytes::from("data:/a/b/c\n\n")]
        );
        assert_eq!(hub.stats().frames_filtered, 3);
    }

    #[tokio::test]
    async fn test_capacity_rejection() {
        let hub = started(HubConfig::default().max_connections(2), LifecycleHooks::new());

        let _a = hub.subscribe("").await.unwrap();
        let _b = hub.subscribe("").await.unwrap();
        wait_until(|| hub.active_connection_count() == 2).await;

        let mut rejected = hub.subscribe("").await.unwrap();
        assert_eq!(next_frame(&mut rejected).await, None);
        assert_eq!(hub.active_connection_count(), 2);
        assert_eq!(hub.stats().rejected, 1);

        // Unregistering a rejected connection is a no-op
        hub.unregister(rejected.id());
        drop(rejected);
        tokio::task::yield_now().await;
        assert_eq!(hub.active_connection_count(), 2);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let hub = started(HubConfig::default(), LifecycleHooks::new());
        let mut sub = hub.subscribe("").await.unwrap();
        wait_until(|| hub.active_connection_count() == 1).await;

        hub.unregister(sub.id());
        hub.unregister(sub.id());
        hub.unregister(sub.id());

        wait_until(|| hub.active_connection_count() == 0).await;
        assert_eq!(next_frame(&mut sub).await, None);

        drop(sub);
        hub.broadcast(SseMessage::data("sync")).await.unwrap();
        wait_until(|| hub.stats().messages_broadcast == 1).await;
        assert_eq!(hub.stats().total_unregistered, 1);
    }

    #[tokio::test]
    async fn test_expiry_sweep() {
        let config = HubConfig::default()
            .inactivity_timeout(Duration::from_millis(50))
            .sweep_interval(Duration::from_millis(20));
        let (hooks, _first, last) = counting_hooks();
        let hub = started(config, hooks);

        let mut sub = hub.subscribe("").await.unwrap();
        wait_until(|| hub.stats().total_registered == 1).await;

        wait_until(|| hub.active_connection_count() == 0).await;
        assert_eq!(next_frame(&mut sub).await, None);
        assert_eq!(hub.stats().expired, 1);
        assert_eq!(last.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sweep_runs_under_sustained_broadcast() {
        let config = HubConfig::default()
            .inactivity_timeout(Duration::from_millis(50))
            .sweep_interval(Duration::from_millis(20));
        let hub = started(config, LifecycleHooks::new());

        let mut sub = hub.subscribe("/quiet").await.unwrap();
        wait_until(|| hub.stats().total_registered == 1).await;

        let running = Arc::new(AtomicBool::new(true));
        let mut publishers = Vec::new();
        for _ in 0..3 {
            let hub = hub.clone();
            let running = Arc::clone(&running);
            publishers.push(tokio::spawn(async move {
                while running.load(Ordering::SeqCst) {
                    if hub.broadcast(SseMessage::new("", "x", "/busy")).await.is_err() {
                        break;
                    }
                }
            }));
        }

        wait_until(|| hub.active_connection_count() == 0).await;
        running.store(false, Ordering::SeqCst);
        for publisher in publishers {
            publisher.await.unwrap();
        }

        assert_eq!(next_frame(&mut sub).await, None);
        assert_eq!(hub.stats().expired, 1);
        assert!(hub.stats().messages_broadcast > 0);
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_delivery_keeps_subscriber_alive() {
        let config = HubConfig::default()
            .inactivity_timeout(Duration::from_millis(150))
            .sweep_interval(Duration::from_millis(20));
        let hub = started(config, LifecycleHooks::new());

        let mut sub = hub.subscribe("").await.unwrap();
        wait_until(|| hub.active_connection_count() == 1).await;

        for _ in 0..10 {
            hub.broadcast(SseMessage::data("ping")).await.unwrap();
            assert!(next_frame(&mut sub).await.is_some());
            time::sleep(Duration::from_millis(30)).await;
        }

        assert_eq!(hub.active_connection_count(), 1);
        assert_eq!(hub.stats().expired, 0);
    }

    #[tokio::test]
    async fn test_shutdown_convergence() {
        let (hooks, _first, last) = counting_hooks();
        let hub = started(HubConfig::default(), hooks);

        let mut subs = Vec::new();
        for _ in 0..20 {
            subs.push(hub.subscribe("").await.unwrap());
        }
        wait_until(|| hub.active_connection_count() == 20).await;

        hub.shutdown().await;

        assert_eq!(hub.active_connection_count(), 0);
        for sub in subs.iter_mut() {
            assert!(sub.is_closed());
            assert_eq!(next_frame(sub).await, None);
        }
        assert_eq!(last.load(Ordering::SeqCst), 1);

        // Repeated stop is harmless
        assert!(!hub.stop());
        hub.shutdown().await;

        assert_eq!(hub.subscribe("").await.unwrap_err(), HubError::Stopped);
        assert_eq!(
            hub.broadcast(SseMessage::data("late")).await,
            Err(HubError::Stopped)
        );
    }

    #[tokio::test]
    async fn test_stop_before_start_closes_pending() {
        let hub = Hub::new(HubConfig::default(), LifecycleHooks::new());

        let mut sub = hub.connect("");
        hub.try_register(sub.connection()).unwrap();

        assert!(hub.stop());
        assert!(!hub.start());
        assert!(sub.is_closed());
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_concurrent_churn_keeps_count_consistent() {
        let hub = started(HubConfig::default(), LifecycleHooks::new());

        let mut handles = Vec::new();
        for i in 0..64 {
            let hub = hub.clone();
            handles.push(tokio::spawn(async move {
                let sub = hub.subscribe("").await.unwrap();
                tokio::task::yield_now().await;
                // Keep every fourth subscriber
                if i % 4 == 0 {
                    Some(sub)
                } else {
                    None
                }
            }));
        }

        let mut kept = Vec::new();
        for handle in handles {
            if let Some(sub) = handle.await.unwrap() {
                kept.push(sub);
            }
        }

        wait_until(|| hub.active_connection_count() == kept.len()).await;

        let stats = hub.stats();
        assert_eq!(
            stats.total_registered - stats.total_unregistered,
            stats.active_connections as u64
        );
    }

    #[tokio::test]
    async fn test_pooled_connections_are_reused() {
        let hub = started(HubConfig::default(), LifecycleHooks::new());

        let sub = hub.subscribe("/first").await.unwrap();
        let first_id = sub.id();
        wait_until(|| hub.active_connection_count() == 1).await;

        drop(sub);
        wait_until(|| hub.pool().idle_count() == 1).await;

        let mut sub = hub.subscribe("/second").await.unwrap();
        assert_ne!(sub.id(), first_id);
        assert_eq!(sub.namespace(), "/second");
        wait_until(|| hub.active_connection_count() == 1).await;

        hub.broadcast(SseMessage::new("", "hi", "/second"))
            .await
            .unwrap();
        assert!(next_frame(&mut sub).await.is_some());

        let stats = hub.stats();
        assert_eq!(stats.pool_reused, 1);
        assert_eq!(stats.pool_allocated, 1);
    }

    #[tokio::test]
    async fn test_stale_unregister_does_not_hit_new_lifetime() {
        let hub = started(HubConfig::default(), LifecycleHooks::new());

        let sub = hub.subscribe("").await.unwrap();
        let stale = sub.id();
        drop(sub);
        wait_until(|| hub.pool().idle_count() == 1).await;

        let _sub = hub.subscribe("").await.unwrap();
        wait_until(|| hub.active_connection_count() == 1).await;

        hub.unregister(stale);
        hub.broadcast(SseMessage::data("sync")).await.unwrap();
        wait_until(|| hub.stats().messages_broadcast == 1).await;
        assert_eq!(hub.active_connection_count(), 1);
    }

    #[tokio::test]
    async fn test_hub_stops_when_handles_dropped() {
        let hub = started(HubConfig::default(), LifecycleHooks::new());
        let mut sub = hub.subscribe("").await.unwrap();
        wait_until(|| hub.active_connection_count() == 1).await;

        drop(hub);
        assert_eq!(next_frame(&mut sub).await, None);
    }
}
