//! HTTP transport for the hub
//!
//! This module provides:
//! - An axum router serving event streams and a health endpoint
//! - CORS policy as a tower-http layer
//! - The per-subscriber event stream with keepalives
//! - An upstream relay that runs only while subscribers are present

pub mod config;
pub mod cors;
pub mod listener;
pub mod relay;
pub mod routes;
pub mod stream;

pub use config::ServerConfig;
pub use cors::CorsConfig;
pub use listener::SseServer;
pub use stream::EventStream;
