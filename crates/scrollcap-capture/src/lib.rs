//! # scrollcap-capture
//!
//! Capture engine for scrollcap: a headless-Chromium client that navigates
//! to a URL, classifies navigation failures, records a full-page scroll as
//! screencast frames, and assembles them into a webm artifact with ffmpeg.
//!
//! Only the engine contract (`open` / `capture` / `finalize` / `close`)
//! is visible to the rest of the system; everything CDP-specific stays in
//! this crate.

pub mod encode;
pub mod engine;

// Re-export core types
pub use scrollcap_core::*;

pub use engine::{CaptureConfig, ChromiumEngine, ChromiumSession};
