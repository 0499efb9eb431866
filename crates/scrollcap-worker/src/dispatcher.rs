//! The job dispatcher: notification handling, the dedup/claim protocol,
//! the status state machine, and cache self-healing.
//!
//! Correctness under duplicated, reordered, and concurrent notifications
//! rests on two things: every multi-step document sequence runs inside the
//! `videos_json` lock, and the claim itself is a single compare-and-swap
//! (`Started → Recording`) so two handlers can never both win a job.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Semaphore};
use tracing::{debug, error, info, instrument, warn};

use scrollcap_core::{
    ArtifactStore, CaptureEngine, Error, FailureKind, JobId, JobPatch, JobRecord, JobStatus,
    JobStore, LockManager, LockName, Result, Subscription,
};

use crate::config::WorkerConfig;

/// Event emitted by the dispatcher.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A capture was claimed and started.
    CaptureStarted { id: JobId, url: String },
    /// A capture finished and the job is Ready.
    CaptureFinished {
        id: JobId,
        path: String,
        duration_ms: u64,
    },
    /// A capture went terminal Failed.
    CaptureFailed { id: JobId, reason: FailureKind },
    /// A notification hit a Ready job with a live artifact.
    CacheHit { id: JobId },
    /// A Ready job with a missing artifact was deleted and restarted.
    Healed { id: JobId },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

/// What handling one notification amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// This handler captured the job; the artifact is at the given path.
    Captured(String),
    /// Ready with a live artifact — nothing to do.
    CacheHit,
    /// Another handler holds the job (Recording/Processing, or in flight
    /// in this process).
    AlreadyClaimed,
    /// The claim CAS lost to a concurrent handler.
    LostClaim,
    /// The job is terminal Failed; only deletion restarts it.
    Terminal,
    /// No document exists for the id.
    UnknownJob,
    /// Capture went terminal Failed with this classification.
    Failed(FailureKind),
}

/// Handle for controlling a running dispatcher.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the dispatcher to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("failed to send shutdown signal".into()))
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// The job dispatcher. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    store: Arc<dyn JobStore>,
    locks: Arc<dyn LockManager>,
    engine: Arc<dyn CaptureEngine>,
    artifacts: Arc<dyn ArtifactStore>,
    config: WorkerConfig,
    /// Ids this process is currently capturing. Not persisted; a cheap
    /// same-process duplicate check, never a substitute for the CAS claim.
    in_flight: StdMutex<HashSet<JobId>>,
    /// Bounds concurrent capture sessions (browser memory/CPU).
    permits: Arc<Semaphore>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl Dispatcher {
    /// Create a dispatcher from its explicit dependencies.
    pub fn new(
        store: Arc<dyn JobStore>,
        locks: Arc<dyn LockManager>,
        engine: Arc<dyn CaptureEngine>,
        artifacts: Arc<dyn ArtifactStore>,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(scrollcap_core::defaults::EVENT_BUS_CAPACITY);
        let permits = Arc::new(Semaphore::new(config.max_concurrent_captures));
        Self {
            inner: Arc::new(DispatcherInner {
                store,
                locks,
                engine,
                artifacts,
                config,
                in_flight: StdMutex::new(HashSet::new()),
                permits,
                event_tx,
            }),
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Number of captures currently in flight in this process.
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().expect("in-flight set poisoned").len()
    }

    /// Start the subscription loop and return a handle for control.
    pub fn start(&self, mut subscription: Box<dyn Subscription>) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.inner.event_tx.subscribe();
        let dispatcher = self.clone();

        tokio::spawn(async move {
            if !dispatcher.inner.config.enabled {
                info!("dispatcher is disabled, not starting");
                return;
            }

            info!(
                max_concurrent = dispatcher.inner.config.max_concurrent_captures,
                max_retries = dispatcher.inner.config.max_retries,
                "dispatcher started"
            );
            let _ = dispatcher.inner.event_tx.send(WorkerEvent::WorkerStarted);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("dispatcher received shutdown signal");
                        break;
                    }
                    next = subscription.next_id() => match next {
                        Ok(Some(id)) => {
                            let handler = dispatcher.clone();
                            tokio::spawn(async move {
                                match handler.handle_notification(&id).await {
                                    Ok(outcome) => {
                                        debug!(job_id = %id, ?outcome, "notification handled")
                                    }
                                    Err(e) => {
                                        error!(job_id = %id, error = %e, "notification handling failed")
                                    }
                                }
                            });
                        }
                        Ok(None) => {
                            info!("notification channel closed");
                            break;
                        }
                        Err(e) => {
                            error!(error = %e, "notification receive failed");
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
            }

            let _ = dispatcher.inner.event_tx.send(WorkerEvent::WorkerStopped);
            info!("dispatcher stopped");
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Handle one notification for `id`.
    ///
    /// Idempotent under duplication and reordering: the document is read
    /// fresh, terminal and in-progress states exit without side effects,
    /// and the claim is a CAS that exactly one handler can win.
    #[instrument(skip(self), fields(subsystem = "worker"))]
    pub async fn handle_notification(&self, id: &JobId) -> Result<HandleOutcome> {
        // cheap same-process duplicate check; the CAS below is the real gate
        if self
            .inner
            .in_flight
            .lock()
            .expect("in-flight set poisoned")
            .contains(id)
        {
            debug!(job_id = %id, "already capturing in this process");
            return Ok(HandleOutcome::AlreadyClaimed);
        }

        let Some(doc) = self.read_doc(id).await? else {
            debug!(job_id = %id, "notification for unknown job");
            return Ok(HandleOutcome::UnknownJob);
        };

        let url = match doc.status {
            status @ (JobStatus::Recording | JobStatus::Processing) => {
                debug!(job_id = %id, %status, "job already claimed elsewhere");
                return Ok(HandleOutcome::AlreadyClaimed);
            }
            JobStatus::Failed => return Ok(HandleOutcome::Terminal),
            JobStatus::Ready => {
                match &doc.path {
                    Some(path) if self.inner.artifacts.exists(path).await? => {
                        debug!(job_id = %id, "cache hit");
                        let _ = self
                            .inner
                            .event_tx
                            .send(WorkerEvent::CacheHit { id: id.clone() });
                        return Ok(HandleOutcome::CacheHit);
                    }
                    _ => {}
                }
                match self.heal(id).await? {
                    HealOutcome::Restarted(url) => {
                        let _ = self
                            .inner
                            .event_tx
                            .send(WorkerEvent::Healed { id: id.clone() });
                        url
                    }
                    HealOutcome::Skip(outcome) => return Ok(outcome),
                }
            }
            JobStatus::Started => doc.url,
        };

        if !self.claim(id).await? {
            debug!(job_id = %id, "claim lost to a concurrent handler");
            return Ok(HandleOutcome::LostClaim);
        }

        let _guard = InFlightGuard::enter(&self.inner, id.clone());
        let _ = self.inner.event_tx.send(WorkerEvent::CaptureStarted {
            id: id.clone(),
            url: url.clone(),
        });

        let started = Instant::now();
        match self.run_capture(id, &url).await {
            Ok(path) => {
                self.merge_doc(id, JobPatch::ready(path.clone())).await?;
                let duration_ms = started.elapsed().as_millis() as u64;
                info!(job_id = %id, %url, duration_ms, "capture ready");
                let _ = self.inner.event_tx.send(WorkerEvent::CaptureFinished {
                    id: id.clone(),
                    path: path.clone(),
                    duration_ms,
                });
                Ok(HandleOutcome::Captured(path))
            }
            Err(e) => {
                let reason = e.failure_kind().unwrap_or(FailureKind::Unknown);
                warn!(
                    job_id = %id,
                    %url,
                    failure_kind = %reason,
                    error = %e,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "capture failed"
                );
                // the job must land in an observable state even on failure
                self.merge_doc(id, JobPatch::failed(reason)).await?;
                let _ = self.inner.event_tx.send(WorkerEvent::CaptureFailed {
                    id: id.clone(),
                    reason,
                });
                Ok(HandleOutcome::Failed(reason))
            }
        }
    }

    /// Read the job document inside the document lock.
    async fn read_doc(&self, id: &JobId) -> Result<Option<JobRecord>> {
        let lock = self.inner.locks.acquire(LockName::VideosJson).await?;
        let doc = self.inner.store.get(id).await;
        lock.release().await?;
        doc
    }

    /// Merge a patch inside the document lock.
    async fn merge_doc(&self, id: &JobId, patch: JobPatch) -> Result<()> {
        let lock = self.inner.locks.acquire(LockName::VideosJson).await?;
        let merged = self.inner.store.merge(id, patch).await;
        lock.release().await?;
        merged
    }

    /// Claim the job: a single CAS from Started to Recording. A lost race
    /// means another handler got here first.
    async fn claim(&self, id: &JobId) -> Result<bool> {
        let lock = self.inner.locks.acquire(LockName::VideosJson).await?;
        let claimed = self
            .inner
            .store
            .try_transition(id, JobStatus::Started, JobStatus::Recording, JobPatch::default())
            .await;
        lock.release().await?;
        claimed
    }

    /// Delete a Ready document whose artifact is gone and restart it from
    /// Started with the same url.
    ///
    /// The document is re-read inside the lock: between our first read and
    /// this critical section another handler may have healed and claimed
    /// the job, and a destructive delete here would wipe its claim. Only a
    /// job that is still a stale Ready gets deleted.
    async fn heal(&self, id: &JobId) -> Result<HealOutcome> {
        let lock = self.inner.locks.acquire(LockName::VideosJson).await?;
        let healed = async {
            let Some(doc) = self.inner.store.get(id).await? else {
                return Ok(HealOutcome::Skip(HandleOutcome::UnknownJob));
            };
            match doc.status {
                JobStatus::Ready => {
                    if let Some(path) = &doc.path {
                        if self.inner.artifacts.exists(path).await? {
                            // freshly re-captured since our first read
                            return Ok(HealOutcome::Skip(HandleOutcome::CacheHit));
                        }
                    }
                    // the url must outlive the document
                    let url = doc.url.clone();
                    self.inner.store.delete(id).await?;
                    // stale partial files must not survive into the fresh
                    // capture; claimants are excluded while we hold the lock
                    self.inner.artifacts.delete_job(id).await?;
                    self.inner.store.create(id, &url).await?;
                    info!(job_id = %id, "stale cache entry healed");
                    Ok(HealOutcome::Restarted(url))
                }
                // someone else already healed it; race them to the claim
                JobStatus::Started => Ok(HealOutcome::Restarted(doc.url)),
                status if status.is_in_progress() => {
                    Ok(HealOutcome::Skip(HandleOutcome::AlreadyClaimed))
                }
                _ => Ok(HealOutcome::Skip(HandleOutcome::Terminal)),
            }
        }
        .await;
        lock.release().await?;
        healed
    }

    /// Run the capture with a bounded retry budget for transient failures.
    async fn run_capture(&self, id: &JobId, url: &str) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.capture_once(id, url).await {
                Ok(path) => return Ok(path),
                Err(e) if e.is_retryable() && attempt <= self.inner.config.max_retries => {
                    warn!(job_id = %id, attempt, error = %e, "transient capture failure, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One engine invocation: open, scroll under the capture deadline,
    /// mark Processing, finalize, close on every exit path.
    async fn capture_once(&self, id: &JobId, url: &str) -> Result<String> {
        let _permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("capture pool closed".into()))?;

        let mut session = self.inner.engine.open(url).await?;

        let captured = async {
            tokio::time::timeout(
                self.inner.config.capture_timeout,
                session.capture(self.inner.config.scroll_speed),
            )
            .await
            .map_err(|_| Error::CaptureTimeout(self.inner.config.capture_timeout.as_secs()))??;

            // scroll finished; the artifact is not finalized yet
            self.merge_doc(id, JobPatch::status(JobStatus::Processing))
                .await?;

            let file = session.finalize(&self.inner.artifacts.job_dir(id)).await?;
            Ok::<String, Error>(format!("{id}/{file}"))
        }
        .await;

        if let Err(e) = session.close().await {
            warn!(job_id = %id, error = %e, "capture session close failed");
        }

        captured
    }
}

/// Result of a self-heal attempt.
enum HealOutcome {
    /// The job is back at Started with this url; proceed to the claim.
    Restarted(String),
    /// The document moved on while we were deciding; exit with this.
    Skip(HandleOutcome),
}

/// Scope guard for the in-flight set: inserted on claim, removed on every
/// outcome including panics.
struct InFlightGuard<'a> {
    inner: &'a DispatcherInner,
    id: JobId,
}

impl<'a> InFlightGuard<'a> {
    fn enter(inner: &'a DispatcherInner, id: JobId) -> Self {
        inner
            .in_flight
            .lock()
            .expect("in-flight set poisoned")
            .insert(id.clone());
        Self { inner, id }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .lock()
            .expect("in-flight set poisoned")
            .remove(&self.id);
    }
}
