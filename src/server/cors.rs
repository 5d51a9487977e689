//! Cross-origin policy

use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Explicit CORS policy
///
/// Without one the server allows any origin for `GET` and `OPTIONS`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorsConfig {
    /// Origins echoed back in `Access-Control-Allow-Origin` (`*` matches any)
    pub allowed_origins: Vec<String>,
    /// Methods listed in `Access-Control-Allow-Methods`
    pub allowed_methods: Vec<String>,
    /// Headers listed in `Access-Control-Allow-Headers`
    pub allowed_headers: Vec<String>,
    /// Preflight cache lifetime in seconds (0 = omit)
    pub max_age: u32,
}

impl CorsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.push(origin.into());
        self
    }

    pub fn allow_method(mut self, method: impl Into<String>) -> Self {
        self.allowed_methods.push(method.into());
        self
    }

    pub fn allow_header(mut self, header: impl Into<String>) -> Self {
        self.allowed_headers.push(header.into());
        self
    }

    pub fn max_age(mut self, seconds: u32) -> Self {
        self.max_age = seconds;
        self
    }

    fn origins(&self) -> AllowOrigin {
        if self.allowed_origins.iter().any(|origin| origin == "*") {
            return AllowOrigin::mirror_request();
        }
        AllowOrigin::list(parse_entries(&self.allowed_origins, |origin| {
            HeaderValue::from_str(origin).ok()
        }))
    }
}

fn parse_entries<T>(entries: &[String], parse: impl Fn(&str) -> Option<T>) -> Vec<T> {
    entries
        .iter()
        .filter_map(|entry| {
            let parsed = parse(entry);
            if parsed.is_none() {
                tracing::warn!(entry = %entry, "Ignoring invalid CORS entry");
            }
            parsed
        })
        .collect()
}

/// Middleware applying `cors`, or the permissive default when `None`
pub fn cors_layer(cors: Option<&CorsConfig>) -> CorsLayer {
    let Some(cors) = cors else {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);
    };

    let methods = parse_entries(&cors.allowed_methods, |method| {
        Method::from_bytes(method.as_bytes()).ok()
    });
    let headers = parse_entries(&cors.allowed_headers, |name| {
        HeaderName::from_bytes(name.as_bytes()).ok()
    });

    let mut layer = CorsLayer::new()
        .allow_origin(cors.origins())
        .allow_methods(methods)
        .allow_headers(headers);
    if cors.max_age > 0 {
        layer = layer.max_age(Duration::from_secs(u64::from(cors.max_age)));
    }
    layer
}
