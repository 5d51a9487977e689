//! # sse-hub
//!
//! A Server-Sent Events fan-out hub for Tokio.
//!
//! One publisher, many subscribers. Each subscriber picks a namespace and
//! receives every message whose namespace starts with it. Slow subscribers
//! are dropped instead of slowing anyone else down, and an optional pair of
//! hooks reports when the first subscriber arrives and the last one leaves.
//!
//! ```no_run
//! use sse_hub::{ServerConfig, SseMessage, SseServer};
//!
//! #[tokio::main]
//! async fn main() -> sse_hub::Result<()> {
//!     let server = SseServer::new(ServerConfig::default());
//!     let publisher = server.publisher();
//!
//!     tokio::spawn(async move {
//!         let message = SseMessage::new("env", r#"{"ok":true}"#, "/sysenv/update");
//!         let _ = publisher.send(message).await;
//!     });
//!
//!     server.run().await
//! }
//! ```
//!
//! The hub can also be used without the HTTP layer:
//!
//! ```no_run
//! use sse_hub::{Hub, HubConfig, LifecycleHooks, SseMessage};
//!
//! # async fn demo() -> Result<(), sse_hub::HubError> {
//! let hub = Hub::new(HubConfig::default(), LifecycleHooks::new());
//! hub.start();
//!
//! let mut sub = hub.subscribe("/chat").await?;
//! hub.broadcast(SseMessage::new("msg", "hi", "/chat/lobby")).await?;
//! let frame = sub.recv().await;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod hub;
pub mod server;
pub mod stats;

pub use error::{Error, Result};
pub use hub::{Hub, HubConfig, HubError, LifecycleHooks, SseMessage, Subscription};
pub use server::{CorsConfig, ServerConfig, SseServer};
pub use stats::HubStats;
