//! HTTP routes
//!
//! Builds the axum router serving event streams under `/subscribe` and the
//! `/health` status line. The namespace is everything after `/subscribe`,
//! percent-decoded, so `/subscribe/sysenv/update` filters on
//! `/sysenv/update` and `/subscribe` alone receives every message.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::hub::Hub;
use crate::server::config::ServerConfig;
use crate::server::cors::cors_layer;
use crate::server::stream::EventStream;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub keepalive: Duration,
}

pub fn build_router(hub: Hub, config: &ServerConfig) -> Router {
    let state = AppState {
        hub,
        keepalive: config.keepalive_interval,
    };

    let mut router = Router::new()
        .route("/subscribe", get(subscribe_all))
        .route("/subscribe/", get(subscribe_all))
        .route("/subscribe/*namespace", get(subscribe_namespace));
    if config.enable_health {
        router = router.route("/health", get(health));
    }

    router
        .layer(cors_layer(config.cors.as_ref()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn subscribe_all(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let client = client_addr(&headers, peer.map(|ConnectInfo(addr)| addr));
    open_stream(state, String::new(), client).await
}

async fn subscribe_namespace(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let client = client_addr(&headers, peer.map(|ConnectInfo(addr)| addr));
    open_stream(state, format!("/{}", namespace), client).await
}

async fn open_stream(state: AppState, namespace: String, client: String) -> Response {
    let sub = match state.hub.subscribe(&namespace).await {
        Ok(sub) => sub,
        Err(e) => {
            tracing::debug!(client = %client, error = %e, "Subscribe refused");
            return (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response();
        }
    };

    tracing::debug!(
        client = %client,
        connection = %sub.id(),
        namespace = %namespace,
        "Subscriber attached"
    );

    let body = Body::from_stream(EventStream::new(sub, state.keepalive));
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        body,
    )
        .into_response()
}

async fn health(State(state): State<AppState>) -> String {
    format!("Active connections: {}", state.hub.active_connection_count())
}

/// Client address for logging
///
/// Proxy headers win over the socket peer: `X-Real-IP`, then the first
/// `X-Forwarded-For` entry.
pub fn client_addr(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    header("x-real-ip")
        .or_else(|| {
            header("x-forwarded-for")
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        })
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}
