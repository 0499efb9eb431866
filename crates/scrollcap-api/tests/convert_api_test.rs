//! Integration tests for the HTTP gateway over in-memory backends.
//!
//! This test suite validates:
//! - Api-001: submit returns 202 with the deterministic id and is
//!   idempotent across repeated submissions
//! - Api-002: status reflects the document (404 for unknown ids, the
//!   failure classification for Failed jobs)
//! - Api-003: the video route streams bytes only for Ready jobs with a
//!   live artifact, and republishes the id when the artifact is gone
//! - Api-004: cache clear removes documents and artifacts and is
//!   idempotent

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use scrollcap_api::{router, AppState};
use scrollcap_core::{
    ArtifactStore, FailureKind, JobId, JobPatch, JobStatus, JobStore, Subscription,
};
use scrollcap_store::{FilesystemArtifacts, MemoryChannel, MemoryJobStore, MemoryLockManager};

struct TestApp {
    state: AppState,
    store: Arc<MemoryJobStore>,
    artifacts: Arc<FilesystemArtifacts>,
    channel: MemoryChannel,
    _tempdir: tempfile::TempDir,
}

fn test_app() -> TestApp {
    let tempdir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let artifacts = Arc::new(FilesystemArtifacts::new(tempdir.path()));
    let channel = MemoryChannel::new();

    let state = AppState {
        store: store.clone(),
        locks: Arc::new(MemoryLockManager::new()),
        notifier: Arc::new(channel.clone()),
        artifacts: artifacts.clone(),
        rate_limiter: None,
        dispatcher: None,
    };

    TestApp {
        state,
        store,
        artifacts,
        channel,
        _tempdir: tempdir,
    }
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn submit_returns_deterministic_id() {
    let app = test_app();

    let response = router(app.state.clone())
        .oneshot(post_json(
            "/api/convert",
            serde_json::json!({"url": "https://example.com"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    assert_eq!(body["status"], "started");
    assert_eq!(body["url"], "https://example.com");
    assert_eq!(
        body["id"],
        JobId::derive("https://example.com").to_string()
    );

    let id = JobId::derive("https://example.com");
    let doc = app.store.get(&id).await.unwrap().unwrap();
    assert_eq!(doc.status, JobStatus::Started);
}

#[tokio::test]
async fn repeated_submission_is_idempotent() {
    let app = test_app();
    let mut subscription = app.channel.subscribe();

    for _ in 0..3 {
        let response = router(app.state.clone())
            .oneshot(post_json(
                "/api/convert",
                serde_json::json!({"url": "https://example.com"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let id = JobId::derive("https://example.com");
    // one document, still Started, url untouched
    let doc = app.store.get(&id).await.unwrap().unwrap();
    assert_eq!(doc.url, "https://example.com");
    assert_eq!(doc.status, JobStatus::Started);

    // every submission published the id; the dispatcher dedups
    for _ in 0..3 {
        assert_eq!(subscription.next_id().await.unwrap(), Some(id.clone()));
    }
}

#[tokio::test]
async fn submit_rejects_empty_url() {
    let app = test_app();
    let response = router(app.state)
        .oneshot(post_json("/api/convert", serde_json::json!({"url": "  "})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_unknown_id_is_404() {
    let app = test_app();
    let id = JobId::derive("https://never.example");
    let response = router(app.state)
        .oneshot(get(&format!("/api/convert/status?id={id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_malformed_id_is_400() {
    let app = test_app();
    let response = router(app.state)
        .oneshot(get("/api/convert/status?id=not-a-digest"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_surfaces_failure_classification() {
    let app = test_app();
    let id = JobId::derive("http://no-such-domain.invalid");
    app.store
        .create(&id, "http://no-such-domain.invalid")
        .await
        .unwrap();
    app.store
        .merge(&id, JobPatch::failed(FailureKind::InvalidUrl))
        .await
        .unwrap();

    let response = router(app.state)
        .oneshot(get(&format!("/api/convert/status?id={id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["failure_reason"], "invalid_url");
}

#[tokio::test]
async fn video_requires_ready_status() {
    let app = test_app();
    let id = JobId::derive("https://example.com");
    app.store.create(&id, "https://example.com").await.unwrap();

    let response = router(app.state)
        .oneshot(get(&format!("/api/convert/video?id={id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn video_streams_ready_artifact() {
    let app = test_app();
    let id = JobId::derive("https://example.com");
    app.store.create(&id, "https://example.com").await.unwrap();

    // place the artifact the way a finished capture would
    let job_dir = app.artifacts.job_dir(&id);
    tokio::fs::create_dir_all(&job_dir).await.unwrap();
    tokio::fs::write(job_dir.join("capture.webm"), b"webm-bytes")
        .await
        .unwrap();
    app.store
        .merge(&id, JobPatch::ready(format!("{id}/capture.webm")))
        .await
        .unwrap();

    let response = router(app.state)
        .oneshot(get(&format!("/api/convert/video?id={id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/webm");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"webm-bytes");
}

#[tokio::test]
async fn video_with_missing_artifact_republishes_for_heal() {
    let app = test_app();
    let mut subscription = app.channel.subscribe();

    let id = JobId::derive("https://example.com");
    app.store.create(&id, "https://example.com").await.unwrap();
    app.store
        .merge(&id, JobPatch::ready(format!("{id}/capture.webm")))
        .await
        .unwrap();
    // no file on disk

    let response = router(app.state)
        .oneshot(get(&format!("/api/convert/video?id={id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // the id went back on the channel so the dispatcher can self-heal
    assert_eq!(subscription.next_id().await.unwrap(), Some(id));
}

#[tokio::test]
async fn clear_cache_removes_everything_and_is_idempotent() {
    let app = test_app();
    let id = JobId::derive("https://example.com");
    app.store.create(&id, "https://example.com").await.unwrap();
    let job_dir = app.artifacts.job_dir(&id);
    tokio::fs::create_dir_all(&job_dir).await.unwrap();
    tokio::fs::write(job_dir.join("capture.webm"), b"x")
        .await
        .unwrap();

    let response = router(app.state.clone())
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/admin/cache")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["jobs_deleted"], 1);
    assert_eq!(body["artifact_dirs_deleted"], 1);

    // the job is gone for status queries
    let response = router(app.state.clone())
        .oneshot(get(&format!("/api/convert/status?id={id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // a second clear is a harmless no-op
    let response = router(app.state)
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/admin/cache")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["jobs_deleted"], 0);
}

#[tokio::test]
async fn index_says_hello() {
    let app = test_app();
    let response = router(app.state).oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["Hello"], "World");
}
