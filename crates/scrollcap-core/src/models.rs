//! Job documents, status state machine, and failure taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Deterministic job identifier: the lowercase 32-hex MD5 digest of the
/// submitted URL. The same URL always maps to the same id, which makes the
/// id double as the cache key and the mutual-exclusion key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Derive the id for a URL.
    pub fn derive(url: &str) -> Self {
        Self(format!("{:x}", md5::compute(url.as_bytes())))
    }

    /// Parse an id received from a client or the notification channel.
    /// Rejects anything that is not exactly 32 lowercase hex characters.
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() == 32 && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::InvalidInput(format!("malformed job id: {s:?}")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job lifecycle status.
///
/// Forward-only: `Started → Recording → Processing → Ready`, with `Failed`
/// reachable from any non-terminal state. Terminal states never transition
/// again; the only way out is deletion (cache-clear or self-heal) followed
/// by a fresh `Started` document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Started,
    Recording,
    Processing,
    Ready,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Started => "started",
            JobStatus::Recording => "recording",
            JobStatus::Processing => "processing",
            JobStatus::Ready => "ready",
            JobStatus::Failed => "failed",
        }
    }

    /// True once a job can never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Ready | JobStatus::Failed)
    }

    /// True when a capture is in progress somewhere and a second handler
    /// must not start another one.
    pub fn is_in_progress(self) -> bool {
        matches!(self, JobStatus::Recording | JobStatus::Processing)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Started, JobStatus::Recording) => true,
            (JobStatus::Recording, JobStatus::Processing) => true,
            (JobStatus::Processing, JobStatus::Ready) => true,
            (s, JobStatus::Failed) => !s.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified capture failure, stored in `failure_reason` and surfaced by
/// status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Unresolvable or malformed URL
    InvalidUrl,
    /// Remote served a 404 for the page
    PageNotFound,
    /// Remote answered with a server error
    SiteDown,
    /// Capture ran past its deadline
    CaptureTimeout,
    /// A coordination lock could not be acquired in time
    LockTimeout,
    /// Anything the engine could not classify
    Unknown,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::InvalidUrl => "invalid_url",
            FailureKind::PageNotFound => "page_not_found",
            FailureKind::SiteDown => "site_down",
            FailureKind::CaptureTimeout => "capture_timeout",
            FailureKind::LockTimeout => "lock_timeout",
            FailureKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job document as stored in the job store, keyed by [`JobId`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub status: JobStatus,
    pub url: String,
    /// Relative artifact path, present iff status = Ready.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Failure classification, present iff status = Failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// A fresh document for a just-submitted URL.
    pub fn started(url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            status: JobStatus::Started,
            url: url.into(),
            path: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overlay `patch` onto this record, bumping `updated_at`. Only fields
    /// the patch carries are touched; `url` and `created_at` are immutable.
    pub fn apply(&mut self, patch: &JobPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(ref path) = patch.path {
            self.path = Some(path.clone());
        }
        if let Some(reason) = patch.failure_reason {
            self.failure_reason = Some(reason);
        }
        self.updated_at = Utc::now();
    }
}

/// Partial overlay applied to a job document by `merge`/`try_transition`.
/// Only fields that are `Some` are written.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureKind>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn ready(path: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Ready),
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn failed(reason: FailureKind) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            failure_reason: Some(reason),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.path.is_none() && self.failure_reason.is_none()
    }
}
