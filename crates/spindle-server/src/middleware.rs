//! Middleware components for the server

use crate::config::CorsConfig;
use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

/// Logging middleware
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let response = next.run(request).await;
    let elapsed = start.elapsed();

    info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        elapsed_ms = %elapsed.as_millis(),
        "Request completed"
    );

    response
}

/// CORS layer from configuration; `*` (or an empty list) allows any origin
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let allow_any = config.allowed_origins.is_empty()
        || config.allowed_origins.iter().any(|origin| origin == "*");

    let origins = if allow_any {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(Duration::from_secs(config.max_age))
}
