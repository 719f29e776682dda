use super::handler::{generate, health};
use crate::server::{broker::Broker, config::ServerConfig};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Limits applied to the HTTP layer, independent of broker admission.
#[derive(Debug, Clone, Copy)]
pub struct HttpLimits {
    pub max_concurrent_requests: usize,
    pub request_body_limit_bytes: usize,
}

impl Default for HttpLimits {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 256,
            request_body_limit_bytes: 1024 * 1024,
        }
    }
}

impl From<&ServerConfig> for HttpLimits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_concurrent_requests: config.max_concurrent_requests,
            request_body_limit_bytes: config.request_body_limit_bytes,
        }
    }
}

pub fn build_router(broker: Broker, limits: HttpLimits) -> Router {
    Router::new()
        .route("/generate", post(generate))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(limits.request_body_limit_bytes))
        .layer(GlobalConcurrencyLimitLayer::new(
            limits.max_concurrent_requests,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(broker)
}
