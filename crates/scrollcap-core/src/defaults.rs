//! Centralized default constants for the scrollcap system.
//!
//! **This module is the single source of truth** for all shared default
//! values. Crates reference these constants instead of defining their own
//! magic numbers.

// =============================================================================
// STORE
// =============================================================================

/// Default Redis connection URL.
pub const REDIS_URL: &str = "redis://localhost:6379";

/// Key prefix for job documents.
pub const JOB_KEY_PREFIX: &str = "videos:";

/// Pub/sub channel carrying newly created job ids.
pub const NOTIFY_CHANNEL: &str = "new_task";

// =============================================================================
// LOCKS
// =============================================================================

/// How long an acquire attempt may wait before `LockTimeout` (milliseconds).
pub const LOCK_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

/// Lock TTL so a crashed holder cannot wedge the system (milliseconds).
/// Locks guard single store operations, so this is generous.
pub const LOCK_TTL_MS: u64 = 30_000;

/// Initial delay between acquire retries (milliseconds); doubles up to
/// [`LOCK_RETRY_DELAY_CAP_MS`].
pub const LOCK_RETRY_DELAY_MS: u64 = 20;

/// Upper bound on the acquire retry delay (milliseconds).
pub const LOCK_RETRY_DELAY_CAP_MS: u64 = 250;

// =============================================================================
// CAPTURE
// =============================================================================

/// Scroll speed in pixels per second.
pub const SCROLL_SPEED: u32 = 300;

/// Browser viewport width.
pub const VIEWPORT_WIDTH: u32 = 1920;

/// Browser viewport height.
pub const VIEWPORT_HEIGHT: u32 = 1080;

/// Navigation deadline (seconds).
pub const NAV_TIMEOUT_SECS: u64 = 30;

/// Scroll-and-record deadline (seconds).
pub const CAPTURE_TIMEOUT_SECS: u64 = 180;

/// Frame-assembly (encoding) deadline (seconds).
pub const ENCODE_TIMEOUT_SECS: u64 = 120;

/// Target frame rate for the assembled video.
pub const CAPTURE_FRAME_RATE: u32 = 20;

/// Artifact file name inside a job's directory.
pub const ARTIFACT_FILE_NAME: &str = "capture.webm";

// =============================================================================
// WORKER
// =============================================================================

/// Retries for transient capture failures before going terminal.
pub const CAPTURE_MAX_RETRIES: u32 = 2;

/// Concurrent browser sessions per dispatcher instance.
pub const MAX_CONCURRENT_CAPTURES: usize = 2;

/// Broadcast capacity for worker events.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// SERVER
// =============================================================================

/// Default artifact storage directory.
pub const VIDEO_STORAGE_PATH: &str = "videos";

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 8000;

/// Default rate limit: max requests per period.
pub const RATE_LIMIT_REQUESTS: u64 = 100;

/// Default rate limit: period in seconds.
pub const RATE_LIMIT_PERIOD_SECS: u64 = 60;
