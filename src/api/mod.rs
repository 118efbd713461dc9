//! HTTP API over the store and the orchestrator.

pub mod routes;

use std::sync::Arc;

use axum::Json;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tower_http::cors::{Any, CorsLayer};

use crate::config::ServerConfig;
use crate::error::{DatabaseError, ForwarderError, PlatformError};
use crate::forwarder::Orchestrator;
use crate::platform::Connector;
use crate::store::Database;

pub use routes::api_routes;

/// Shared state for API routes.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn Database>,
    pub connector: Arc<dyn Connector>,
    pub orchestrator: Arc<Orchestrator>,
}

/// Error returned by a handler, rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Forwarder(#[from] ForwarderError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) | ApiError::Forwarder(ForwarderError::RuleNotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Forwarder(ForwarderError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("API error: {self}");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// CORS layer for the configured origins.
pub fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.allows_any_origin() {
        return base.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin: {e}");
                None
            }
        })
        .collect();
    base.allow_origin(allowed)
}
