//! Conversion endpoints: submit, status, video streaming, cache admin.

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use scrollcap_core::{Error, FailureKind, JobId, JobStatus, LockName};

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ConvertResponse {
    pub id: String,
    pub status: JobStatus,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct JobQuery {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureKind>,
}

pub async fn index() -> impl IntoResponse {
    Json(serde_json::json!({ "Hello": "World" }))
}

/// Submit a URL for capture.
///
/// Idempotent: the id is a pure function of the url, the create is
/// conditional, and duplicate submissions return the same id without a
/// second document. The publish always happens — the dispatcher's claim
/// protocol makes duplicate notifications harmless, and a republish is
/// what lets a stale Ready entry heal on resubmission.
pub async fn submit(
    State(state): State<AppState>,
    Json(req): Json<ConvertRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let url = req.url.trim().to_string();
    if url.is_empty() {
        return Err(ApiError::BadRequest("url must not be empty".to_string()));
    }

    let id = JobId::derive(&url);

    let lock = state.locks.acquire(LockName::NewTask).await?;
    let submitted = async {
        let created = state.store.create(&id, &url).await?;
        state.notifier.publish(&id).await?;
        Ok::<bool, Error>(created)
    }
    .await;
    lock.release().await?;

    let created = submitted?;
    info!(job_id = %id, %url, created, "capture submitted");

    Ok((
        StatusCode::ACCEPTED,
        Json(ConvertResponse {
            id: id.to_string(),
            status: JobStatus::Started,
            url,
        }),
    ))
}

/// Current status for a job id, or 404 if no document exists.
pub async fn status(
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let id = JobId::parse(&query.id)?;

    let lock = state.locks.acquire(LockName::VideosJson).await?;
    let doc = state.store.get(&id).await;
    lock.release().await?;

    let doc = doc?.ok_or_else(|| {
        ApiError::NotFound("no task or video found with the given id".to_string())
    })?;

    Ok(Json(StatusResponse {
        status: doc.status,
        failure_reason: doc.failure_reason,
    }))
}

/// Stream the finished video for a Ready job.
pub async fn video(
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let id = JobId::parse(&query.id)?;

    let lock = state.locks.acquire(LockName::VideosJson).await?;
    let doc = state.store.get(&id).await;
    lock.release().await?;

    let not_ready = || {
        ApiError::NotFound(
            "video does not exist; request a capture first or let the running one finish"
                .to_string(),
        )
    };

    let doc = doc?.ok_or_else(not_ready)?;
    if doc.status != JobStatus::Ready {
        return Err(not_ready());
    }
    let path = doc.path.ok_or_else(not_ready)?;

    if !state.artifacts.exists(&path).await? {
        // stale cache entry: nudge the dispatcher to heal it and tell the
        // client to come back
        warn!(job_id = %id, %path, "ready job with missing artifact");
        let _ = state.notifier.publish(&id).await;
        return Err(ApiError::NotFound(
            "video artifact is being regenerated, retry shortly".to_string(),
        ));
    }

    let file = tokio::fs::File::open(state.artifacts.resolve(&path))
        .await
        .map_err(Error::from)?;
    let stream = ReaderStream::new(file);

    Ok((
        [(header::CONTENT_TYPE, "video/webm")],
        Body::from_stream(stream),
    ))
}

/// Delete all job documents and stored artifacts. Best-effort and
/// idempotent.
pub async fn clear_cache(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let lock = state.locks.acquire(LockName::VideosJson).await?;
    let jobs = state.store.clear().await;
    lock.release().await?;
    let jobs = jobs?;

    let artifacts = state.artifacts.clear().await?;
    info!(jobs, artifacts, "cache cleared");

    Ok(Json(serde_json::json!({
        "jobs_deleted": jobs,
        "artifact_dirs_deleted": artifacts,
    })))
}

/// Liveness: store round trip plus dispatcher gauge.
pub async fn health(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state.store.ping().await?;
    let in_flight = state.dispatcher.as_ref().map(|d| d.in_flight_count());

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "store": "ok",
        "captures_in_flight": in_flight,
    })))
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    if let Some(limiter) = &state.rate_limiter {
        if limiter.check().is_err() {
            warn!("rate limit exceeded");
            return Err((
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "error": "rate_limit_exceeded",
                    "error_description": "Too many requests. Please wait before retrying."
                })),
            ));
        }
    }
    Ok(next.run(request).await)
}
