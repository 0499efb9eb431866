//! Trait seams between the gateway, the dispatcher, and the backing services.
//!
//! Every collaborator the dispatcher needs — the job store, the lock
//! manager, the notification channel, the capture engine, and artifact
//! storage — is an explicit dependency behind one of these traits, so the
//! whole coordination path can run against in-memory implementations in
//! tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{JobId, JobPatch, JobRecord, JobStatus};

/// The two named coordination locks.
///
/// `NewTask` serializes job creation plus the publish that follows it;
/// `VideosJson` serializes every read/write of job documents. Locks are
/// held for single store operations only, never across a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockName {
    NewTask,
    VideosJson,
}

impl LockName {
    pub fn as_str(self) -> &'static str {
        match self {
            LockName::NewTask => "new_task",
            LockName::VideosJson => "videos_json",
        }
    }
}

impl std::fmt::Display for LockName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document store for job records, keyed by [`JobId`].
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert `{status: started, url}` for `id` only if no document exists.
    /// Returns whether the insert happened. Never overwrites.
    async fn create(&self, id: &JobId, url: &str) -> Result<bool>;

    /// Fetch the document, if any.
    async fn get(&self, id: &JobId) -> Result<Option<JobRecord>>;

    /// Atomically overlay `patch` onto the existing document.
    /// Errors with `NotFound` if the document is gone.
    async fn merge(&self, id: &JobId, patch: JobPatch) -> Result<()>;

    /// Compare-and-swap over the status field: apply `to` (plus `patch`)
    /// only if the stored status still equals `from`. Returns whether the
    /// transition won. This is the claim primitive — a lost race is a
    /// normal outcome, not an error.
    async fn try_transition(
        &self,
        id: &JobId,
        from: JobStatus,
        to: JobStatus,
        patch: JobPatch,
    ) -> Result<bool>;

    /// Remove the document. Returns whether anything was deleted.
    async fn delete(&self, id: &JobId) -> Result<bool>;

    /// Best-effort removal of every job document; returns how many went.
    async fn clear(&self) -> Result<u64>;

    /// Round-trip liveness check for the health endpoint.
    async fn ping(&self) -> Result<()>;
}

/// An acquired lock. Call [`HeldLock::release`] on the normal path; on
/// early exits the implementation releases from `Drop` as a fallback, so
/// no code path can leave the lock held.
#[async_trait]
pub trait HeldLock: Send {
    async fn release(self: Box<Self>) -> Result<()>;
}

/// Named, globally visible mutual exclusion.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Block until the named lock is held, bounded by the implementation's
    /// acquire deadline (`Error::LockTimeout` past it).
    async fn acquire(&self, name: LockName) -> Result<Box<dyn HeldLock>>;
}

/// Producer side of the new-job notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, id: &JobId) -> Result<()>;
}

/// Consumer side of the new-job notification channel. Delivery is
/// best-effort: ids may arrive duplicated or reordered relative to
/// document creation, and handlers verify document state themselves.
#[async_trait]
pub trait Subscription: Send {
    /// The next published job id, or `None` once the channel is closed.
    async fn next_id(&mut self) -> Result<Option<JobId>>;
}

/// One navigation session against the capture engine.
///
/// `close` must run on every exit path; implementations also clean up from
/// `Drop` so an error between `capture` and `close` cannot leak a page.
#[async_trait]
pub trait CaptureSession: Send {
    /// Perform the full-page scroll at `speed` px/s while recording.
    async fn capture(&mut self, speed: u32) -> Result<()>;

    /// Assemble the recording and atomically place it in `out_dir`;
    /// returns the artifact file name.
    async fn finalize(&mut self, out_dir: &Path) -> Result<String>;

    /// Release all resources held by the session.
    async fn close(&mut self) -> Result<()>;
}

/// The capture engine: navigates and classifies, then hands back a session.
#[async_trait]
pub trait CaptureEngine: Send + Sync {
    /// Navigate to `url`. Classified navigation failures come back as
    /// `Error::Navigation` with the observed cause; only a usable page
    /// yields a session.
    async fn open(&self, url: &str) -> Result<Box<dyn CaptureSession>>;
}

/// Per-job artifact storage: one directory per job id under a flat base.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Absolute directory exclusive to this job id.
    fn job_dir(&self, id: &JobId) -> PathBuf;

    /// Absolute path for a stored relative artifact path.
    fn resolve(&self, rel_path: &str) -> PathBuf;

    /// Whether the artifact at `rel_path` is present and non-empty.
    async fn exists(&self, rel_path: &str) -> Result<bool>;

    /// Read the whole artifact into memory.
    async fn read(&self, rel_path: &str) -> Result<Vec<u8>>;

    /// Remove the job's directory and everything under it.
    async fn delete_job(&self, id: &JobId) -> Result<()>;

    /// Remove every job directory; returns how many were deleted.
    async fn clear(&self) -> Result<u64>;

    /// Startup write-read-delete round trip to catch storage issues early.
    async fn validate(&self) -> Result<()>;
}
