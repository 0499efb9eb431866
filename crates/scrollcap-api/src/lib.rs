//! # scrollcap-api
//!
//! HTTP gateway for scrollcap: submit a URL for capture, poll its status,
//! stream the finished video, and administer the cache.

pub mod handlers;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};

use scrollcap_core::{ArtifactStore, Error, JobStore, LockManager, Notifier};
use scrollcap_worker::Dispatcher;

/// Global rate limiter type (direct quota, no keyed bucketing).
pub type GlobalRateLimiter = governor::RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub locks: Arc<dyn LockManager>,
    pub notifier: Arc<dyn Notifier>,
    pub artifacts: Arc<dyn ArtifactStore>,
    /// Global rate limiter (None if rate limiting is disabled).
    pub rate_limiter: Option<Arc<GlobalRateLimiter>>,
    /// In-process dispatcher, when this instance runs one (health only).
    pub dispatcher: Option<Dispatcher>,
}

/// API-level error with an HTTP mapping.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(Error),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match &err {
            Error::NotFound(msg) => ApiError::NotFound(msg.clone()),
            Error::InvalidInput(msg) => ApiError::BadRequest(msg.clone()),
            _ => ApiError::Internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

/// Build the application router over the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::convert::index))
        .route("/api/convert", post(handlers::convert::submit))
        .route("/api/convert/status", get(handlers::convert::status))
        .route("/api/convert/video", get(handlers::convert::video))
        .route("/api/admin/cache", delete(handlers::convert::clear_cache))
        .route("/api/health", get(handlers::convert::health))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            handlers::convert::rate_limit_middleware,
        ))
        .with_state(state)
}
