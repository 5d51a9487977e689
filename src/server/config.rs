//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::server::cors::CorsConfig;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Comment frame sent on quiet streams at this interval
    pub keepalive_interval: Duration,

    /// Serve `/health`
    pub enable_health: bool,

    /// Explicit CORS policy (None = allow any origin)
    pub cors: Option<CorsConfig>,

    /// Messages buffered between the publisher and the hub
    pub upstream_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8082)),
            keepalive_interval: Duration::from_secs(30),
            enable_health: true,
            cors: None,
            upstream_capacity: 64,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set keepalive interval
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Disable the `/health` endpoint
    pub fn disable_health(mut self) -> Self {
        self.enable_health = false;
        self
    }

    /// Use an explicit CORS policy
    pub fn cors(mut self, cors: CorsConfig) -> Self {
        self.cors = Some(cors);
        self
    }

    /// Set upstream buffer capacity (at least 1)
    pub fn upstream_capacity(mut self, capacity: usize) -> Self {
        self.upstream_capacity = capacity.max(1);
        self
    }
}
