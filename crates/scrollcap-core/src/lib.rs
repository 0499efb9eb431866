//! # scrollcap-core
//!
//! Core types, traits, and abstractions for scrollcap.
//!
//! This crate provides the job document model, the status state machine,
//! the failure taxonomy, and the trait seams (job store, lock manager,
//! notification channel, capture engine, artifact storage) that the other
//! scrollcap crates implement and consume.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::{FailureKind, JobId, JobPatch, JobRecord, JobStatus};
pub use traits::{
    ArtifactStore, CaptureEngine, CaptureSession, HeldLock, JobStore, LockManager, LockName,
    Notifier, Subscription,
};
