//! Integration tests for the dispatcher over in-memory coordination
//! backends and a mock capture engine.
//!
//! This test suite validates:
//! - Dispatcher-001: a notification drives Started → Recording →
//!   Processing → Ready with a readable artifact
//! - Dispatcher-002: concurrent duplicate notifications produce exactly
//!   one engine invocation
//! - Dispatcher-003: Ready with a live artifact is a cache hit (no work)
//! - Dispatcher-004: Ready with a missing artifact self-heals and
//!   re-captures to a fresh Ready
//! - Dispatcher-005: classified navigation failures land terminal Failed
//!   with the classification preserved
//! - Dispatcher-006: transient failures retry a bounded number of times
//! - Dispatcher-007: the session is closed on success and failure paths
//! - Dispatcher-008: unknown ids and terminal jobs exit without side
//!   effects
//! - Dispatcher-009: the subscription loop processes published ids
//!   end-to-end and shuts down gracefully

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use scrollcap_store::{
    FilesystemArtifacts, MemoryChannel, MemoryJobStore, MemoryLockManager,
};
use scrollcap_worker::{
    ArtifactStore, CaptureEngine, CaptureSession, Dispatcher, Error, FailureKind, HandleOutcome,
    JobId, JobStatus, JobStore, Notifier, WorkerConfig, WorkerEvent,
};

// ============================================================================
// MOCK ENGINE
// ============================================================================

#[derive(Clone, Copy)]
enum EngineBehavior {
    /// Navigate and capture successfully.
    Succeed,
    /// Fail navigation with the given classification.
    NavFail(FailureKind),
    /// Navigate, then time out on every capture attempt.
    CaptureAlwaysTimesOut,
}

struct MockEngine {
    behavior: EngineBehavior,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    capture_delay: Duration,
}

#[async_trait::async_trait]
impl CaptureEngine for MockEngine {
    async fn open(&self, _url: &str) -> scrollcap_worker::Result<Box<dyn CaptureSession>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            EngineBehavior::NavFail(kind) => Err(Error::Navigation(kind)),
            behavior => Ok(Box::new(MockSession {
                behavior,
                closes: self.closes.clone(),
                capture_delay: self.capture_delay,
            })),
        }
    }
}

struct MockSession {
    behavior: EngineBehavior,
    closes: Arc<AtomicUsize>,
    capture_delay: Duration,
}

#[async_trait::async_trait]
impl CaptureSession for MockSession {
    async fn capture(&mut self, _speed: u32) -> scrollcap_worker::Result<()> {
        sleep(self.capture_delay).await;
        match self.behavior {
            EngineBehavior::CaptureAlwaysTimesOut => Err(Error::CaptureTimeout(1)),
            _ => Ok(()),
        }
    }

    async fn finalize(&mut self, out_dir: &Path) -> scrollcap_worker::Result<String> {
        tokio::fs::create_dir_all(out_dir).await?;
        tokio::fs::write(out_dir.join("capture.webm"), b"webm-bytes").await?;
        Ok("capture.webm".to_string())
    }

    async fn close(&mut self) -> scrollcap_worker::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// HARNESS
// ============================================================================

struct Harness {
    store: Arc<MemoryJobStore>,
    artifacts: Arc<FilesystemArtifacts>,
    channel: MemoryChannel,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    dispatcher: Dispatcher,
    _tempdir: tempfile::TempDir,
}

fn harness(behavior: EngineBehavior) -> Harness {
    harness_with(behavior, WorkerConfig::default(), Duration::from_millis(10))
}

fn harness_with(behavior: EngineBehavior, config: WorkerConfig, capture_delay: Duration) -> Harness {
    let tempdir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let locks = Arc::new(MemoryLockManager::new());
    let artifacts = Arc::new(FilesystemArtifacts::new(tempdir.path()));
    let channel = MemoryChannel::new();
    let opens = Arc::new(AtomicUsize::new(0));
    let closes = Arc::new(AtomicUsize::new(0));
    let engine = Arc::new(MockEngine {
        behavior,
        opens: opens.clone(),
        closes: closes.clone(),
        capture_delay,
    });

    let dispatcher = Dispatcher::new(
        store.clone(),
        locks,
        engine,
        artifacts.clone(),
        config,
    );

    Harness {
        store,
        artifacts,
        channel,
        opens,
        closes,
        dispatcher,
        _tempdir: tempdir,
    }
}

/// Create the job document the way the gateway does on submit.
async fn submit(store: &MemoryJobStore, url: &str) -> JobId {
    let id = JobId::derive(url);
    assert!(store.create(&id, url).await.unwrap());
    id
}

/// Wait for a job to reach a specific status.
async fn wait_for_status(
    store: &MemoryJobStore,
    id: &JobId,
    expected: JobStatus,
    timeout_secs: u64,
) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed().as_secs() < timeout_secs {
        if let Ok(Some(doc)) = store.get(id).await {
            if doc.status == expected {
                return true;
            }
        }
        sleep(Duration::from_millis(20)).await;
    }
    false
}

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test]
async fn notification_drives_job_to_ready() {
    let h = harness(EngineBehavior::Succeed);
    let id = submit(&h.store, "https://example.com").await;

    let outcome = h.dispatcher.handle_notification(&id).await.unwrap();
    assert_eq!(outcome, HandleOutcome::Captured(format!("{id}/capture.webm")));

    let doc = h.store.get(&id).await.unwrap().unwrap();
    assert_eq!(doc.status, JobStatus::Ready);
    assert_eq!(doc.path, Some(format!("{id}/capture.webm")));
    assert!(doc.failure_reason.is_none());

    // the artifact the document points at is readable and non-empty
    let data = h.artifacts.read(doc.path.as_deref().unwrap()).await.unwrap();
    assert!(!data.is_empty());

    assert_eq!(h.opens.load(Ordering::SeqCst), 1);
    assert_eq!(h.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_duplicates_capture_exactly_once() {
    let h = harness_with(
        EngineBehavior::Succeed,
        WorkerConfig::default(),
        Duration::from_millis(100),
    );
    let id = submit(&h.store, "https://example.com").await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let dispatcher = h.dispatcher.clone();
        let id = id.clone();
        tasks.push(tokio::spawn(async move {
            dispatcher.handle_notification(&id).await.unwrap()
        }));
    }

    let mut captured = 0;
    for task in tasks {
        match task.await.unwrap() {
            HandleOutcome::Captured(_) => captured += 1,
            HandleOutcome::AlreadyClaimed | HandleOutcome::LostClaim | HandleOutcome::CacheHit => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    assert_eq!(captured, 1);
    assert_eq!(h.opens.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.store.get(&id).await.unwrap().unwrap().status,
        JobStatus::Ready
    );
}

#[tokio::test]
async fn ready_with_live_artifact_is_a_cache_hit() {
    let h = harness(EngineBehavior::Succeed);
    let id = submit(&h.store, "https://example.com").await;

    h.dispatcher.handle_notification(&id).await.unwrap();
    assert_eq!(h.opens.load(Ordering::SeqCst), 1);

    // a duplicate notification after completion does nothing
    let outcome = h.dispatcher.handle_notification(&id).await.unwrap();
    assert_eq!(outcome, HandleOutcome::CacheHit);
    assert_eq!(h.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_artifact_heals_and_recaptures() {
    let h = harness(EngineBehavior::Succeed);
    let id = submit(&h.store, "https://example.com").await;

    h.dispatcher.handle_notification(&id).await.unwrap();
    let doc = h.store.get(&id).await.unwrap().unwrap();
    let path = doc.path.clone().unwrap();

    // an external process removes the artifact behind our back
    tokio::fs::remove_file(h.artifacts.resolve(&path))
        .await
        .unwrap();

    let outcome = h.dispatcher.handle_notification(&id).await.unwrap();
    assert_eq!(outcome, HandleOutcome::Captured(path.clone()));
    assert_eq!(h.opens.load(Ordering::SeqCst), 2);

    // fresh Ready with a valid artifact, same immutable url
    let doc = h.store.get(&id).await.unwrap().unwrap();
    assert_eq!(doc.status, JobStatus::Ready);
    assert_eq!(doc.url, "https://example.com");
    assert!(h.artifacts.exists(&path).await.unwrap());
}

#[tokio::test]
async fn navigation_failure_lands_terminal_failed() {
    let h = harness(EngineBehavior::NavFail(FailureKind::InvalidUrl));
    let id = submit(&h.store, "http://no-such-domain.invalid").await;

    let outcome = h.dispatcher.handle_notification(&id).await.unwrap();
    assert_eq!(outcome, HandleOutcome::Failed(FailureKind::InvalidUrl));

    let doc = h.store.get(&id).await.unwrap().unwrap();
    assert_eq!(doc.status, JobStatus::Failed);
    assert_eq!(doc.failure_reason, Some(FailureKind::InvalidUrl));

    // terminal Failed exits without side effects on later notifications
    let outcome = h.dispatcher.handle_notification(&id).await.unwrap();
    assert_eq!(outcome, HandleOutcome::Terminal);
    assert_eq!(h.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transient_failures_retry_then_fail() {
    let config = WorkerConfig::default().with_max_retries(2);
    let h = harness_with(
        EngineBehavior::CaptureAlwaysTimesOut,
        config,
        Duration::from_millis(1),
    );
    let id = submit(&h.store, "https://slow.example").await;

    let outcome = h.dispatcher.handle_notification(&id).await.unwrap();
    assert_eq!(outcome, HandleOutcome::Failed(FailureKind::CaptureTimeout));

    // initial attempt plus two retries
    assert_eq!(h.opens.load(Ordering::SeqCst), 3);
    // every session was closed
    assert_eq!(h.closes.load(Ordering::SeqCst), 3);

    let doc = h.store.get(&id).await.unwrap().unwrap();
    assert_eq!(doc.status, JobStatus::Failed);
    assert_eq!(doc.failure_reason, Some(FailureKind::CaptureTimeout));
}

#[tokio::test]
async fn unknown_id_is_a_no_op() {
    let h = harness(EngineBehavior::Succeed);
    let id = JobId::derive("https://never-submitted.example");

    let outcome = h.dispatcher.handle_notification(&id).await.unwrap();
    assert_eq!(outcome, HandleOutcome::UnknownJob);
    assert_eq!(h.opens.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn in_flight_set_empties_after_every_outcome() {
    let h = harness(EngineBehavior::NavFail(FailureKind::SiteDown));
    let id = submit(&h.store, "https://down.example").await;

    h.dispatcher.handle_notification(&id).await.unwrap();
    assert_eq!(h.dispatcher.in_flight_count(), 0);

    let h = harness(EngineBehavior::Succeed);
    let id = submit(&h.store, "https://up.example").await;
    h.dispatcher.handle_notification(&id).await.unwrap();
    assert_eq!(h.dispatcher.in_flight_count(), 0);
}

#[tokio::test]
async fn subscription_loop_processes_published_ids() {
    let h = harness(EngineBehavior::Succeed);
    let mut events = h.dispatcher.events();

    let handle = h.dispatcher.start(Box::new(h.channel.subscribe()));

    let id = submit(&h.store, "https://example.com").await;
    h.channel.publish(&id).await.unwrap();

    assert!(wait_for_status(&h.store, &id, JobStatus::Ready, 5).await);

    // the event stream saw the capture lifecycle
    let mut saw_started = false;
    let mut saw_finished = false;
    while let Ok(event) =
        tokio::time::timeout(Duration::from_millis(200), events.recv()).await
    {
        match event.unwrap() {
            WorkerEvent::CaptureStarted { .. } => saw_started = true,
            WorkerEvent::CaptureFinished { .. } => {
                saw_finished = true;
                break;
            }
            _ => {}
        }
    }
    assert!(saw_started);
    assert!(saw_finished);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn duplicate_publishes_are_tolerated() {
    let h = harness_with(
        EngineBehavior::Succeed,
        WorkerConfig::default(),
        Duration::from_millis(50),
    );
    let handle = h.dispatcher.start(Box::new(h.channel.subscribe()));

    let id = submit(&h.store, "https://example.com").await;
    // the same id published several times, as concurrent submitters would
    for _ in 0..5 {
        h.channel.publish(&id).await.unwrap();
    }

    assert!(wait_for_status(&h.store, &id, JobStatus::Ready, 5).await);
    // give stragglers a moment, then confirm nothing re-captured
    sleep(Duration::from_millis(100)).await;
    assert_eq!(h.opens.load(Ordering::SeqCst), 1);

    handle.shutdown().await.unwrap();
}
