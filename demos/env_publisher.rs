//! SSE server publishing runtime information once a second
//!
//! Run with: cargo run --example env_publisher [BIND_ADDR]
//!
//! Then subscribe:
//!   curl -N http://localhost:8082/subscribe/sysenv
//!
//! Check status:
//!   curl http://localhost:8082/health
//!
//! Messages only flow while at least one client is subscribed; the
//! publisher waits otherwise.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use sse_hub::{HubConfig, LifecycleHooks, ServerConfig, SseMessage, SseServer};

fn parse_bind_addr(s: &str) -> Result<SocketAddr, String> {
    if let Ok(addr) = s.parse() {
        return Ok(addr);
    }
    if let Ok(port) = s.parse::<u16>() {
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    Err(format!("Invalid bind address '{}'", s))
}

fn env_payload(started: Instant, active: usize) -> String {
    format!(
        r#"{{"pid":{},"uptimeSecs":{},"activeConnections":{},"os":"{}","arch":"{}"}}"#,
        std::process::id(),
        started.elapsed().as_secs(),
        active,
        std::env::consts::OS,
        std::env::consts::ARCH,
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bind_addr = match std::env::args().nth(1) {
        Some(arg) => parse_bind_addr(&arg)?,
        None => ServerConfig::default().bind_addr,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sse_hub=debug".parse()?)
                .add_directive("env_publisher=debug".parse()?),
        )
        .init();

    let hooks = LifecycleHooks::new()
        .on_first_subscriber(|| tracing::info!("First subscriber, publishing"))
        .on_last_subscriber_gone(|| tracing::info!("No subscribers left, pausing"));

    let server = SseServer::with_hub_config(
        ServerConfig::with_addr(bind_addr),
        HubConfig::default(),
        hooks,
    );

    println!("Starting SSE server on {}", server.bind_addr());
    println!("Subscribe: curl -N http://localhost:{}/subscribe/sysenv", bind_addr.port());
    println!();

    let publisher = server.publisher();
    let hub = server.hub().clone();
    tokio::spawn(async move {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let payload = env_payload(started, hub.active_connection_count());
            let message = SseMessage::new("env", payload, "/sysenv/update");
            if publisher.send(message).await.is_err() {
                break;
            }
        }
    });

    let result = server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await;

    if let Err(e) = result {
        eprintln!("Server error: {}", e);
    }

    Ok(())
}
