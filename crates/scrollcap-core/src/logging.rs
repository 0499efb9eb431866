//! Structured logging field name constants for scrollcap.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation tools can query by standardized names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), capture completions |
//! | DEBUG | Decision points (claim lost, cache hit), config choices |
//! | TRACE | Per-frame / per-message volume |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID propagated across request → job. Format: UUIDv7.
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "api", "store", "worker", "capture"
pub const SUBSYSTEM: &str = "subsystem";

/// Logical operation name.
/// Examples: "submit", "claim", "capture", "self_heal", "clear_cache"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job id (32-hex URL digest) being operated on.
pub const JOB_ID: &str = "job_id";

/// URL being captured.
pub const URL: &str = "url";

/// Job status after the operation.
pub const STATUS: &str = "status";

/// Lock name involved in the operation.
pub const LOCK: &str = "lock";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Retry attempt number (1-based).
pub const ATTEMPT: &str = "attempt";

/// Number of captures currently in flight in this process.
pub const IN_FLIGHT: &str = "in_flight";

/// Number of screencast frames collected.
pub const FRAME_COUNT: &str = "frame_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Classified capture failure recorded on a job.
pub const FAILURE_KIND: &str = "failure_kind";
