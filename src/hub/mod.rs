//! Connection registry and broadcast hub
//!
//! The hub is the single authority over the set of live subscribers. It
//! fans published messages out to every subscriber whose namespace matches,
//! drops subscribers that cannot keep up, recycles their connections and
//! reaps the ones that go idle.
//!
//! # Architecture
//!
//! ```text
//!     register ──┐        ┌──────────────────────────────┐
//!   unregister ──┼──────► │ event loop (one task)        │
//!    broadcast ──┤        │   live: HashMap<Id, Arc<Conn>>│
//!         stop ──┘        │   sweep / status tickers     │
//!                         └──────────────┬───────────────┘
//!                                        │ try_send(Bytes)
//!              ┌─────────────────────────┼─────────────────────────┐
//!              ▼                         ▼                         ▼
//!        [Connection]              [Connection]              [Connection]
//!        mpsc queue                mpsc queue                mpsc queue
//!              │                         │                         │
//!        Subscription::recv()      Subscription::recv()      Subscription::recv()
//!              └──► transport writes the frame to its socket
//! ```
//!
//! # Backpressure
//!
//! Enqueue never waits. A subscriber whose queue is full when a broadcast
//! reaches it is unregistered after that broadcast pass; everyone else in
//! the pass still gets the message.
//!
//! # Zero-Copy Fan-Out
//!
//! Each message is encoded once into `bytes::Bytes`; every queue receives a
//! reference-counted handle to the same allocation.

pub mod config;
pub mod connection;
pub mod error;
pub mod hooks;
pub mod message;
pub mod pool;
pub mod registry;

pub use config::HubConfig;
pub use connection::{Connection, ConnectionId, EnqueueOutcome, Subscription};
pub use error::HubError;
pub use hooks::{Hook, HubObserver, LifecycleHooks, NoopObserver, TracingObserver, UnregisterReason};
pub use message::{SseMessage, KEEPALIVE_FRAME};
pub use pool::{BufferPool, ConnectionPool, PoolStats};
pub use registry::Hub;
