//! # scrollcap-store
//!
//! Redis coordination layer for scrollcap.
//!
//! This crate provides:
//! - The job document store (`SET NX` create, Lua merge, Lua CAS claim)
//! - Named distributed locks (`new_task`, `videos_json`)
//! - The new-job pub/sub notification channel
//! - Filesystem artifact storage (one directory per job id)
//! - In-memory implementations of all of the above for tests

pub mod artifacts;
pub mod client;
pub mod jobs;
pub mod locks;
pub mod memory;
pub mod notify;

// Re-export core types
pub use scrollcap_core::*;

pub use artifacts::FilesystemArtifacts;
pub use client::connect;
pub use jobs::RedisJobStore;
pub use locks::RedisLockManager;
pub use memory::{
    MemoryChannel, MemoryJobStore, MemoryLockManager, MemorySubscription,
};
pub use notify::{RedisNotifier, RedisSubscription};
