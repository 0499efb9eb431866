//! # scrollcap-worker
//!
//! Job dispatcher for scrollcap.
//!
//! This crate provides:
//! - The notification subscription loop
//! - The dedup/claim protocol (CAS `Started → Recording`)
//! - The job status state machine through to Ready/Failed
//! - Cache self-healing for Ready jobs with missing artifacts
//! - Worker events over a broadcast channel
//!
//! ## Example
//!
//! ```ignore
//! use scrollcap_worker::{Dispatcher, WorkerConfig};
//!
//! let dispatcher = Dispatcher::new(store, locks, engine, artifacts, WorkerConfig::from_env());
//! let handle = dispatcher.start(subscription);
//!
//! // Listen for events
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! // Graceful shutdown
//! handle.shutdown().await?;
//! ```

pub mod config;
pub mod dispatcher;

// Re-export core types
pub use scrollcap_core::*;

pub use config::WorkerConfig;
pub use dispatcher::{Dispatcher, HandleOutcome, WorkerEvent, WorkerHandle};
