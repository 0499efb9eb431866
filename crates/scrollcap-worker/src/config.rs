//! Dispatcher configuration.

use std::time::Duration;

use scrollcap_core::defaults;

/// Configuration for the job dispatcher.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Scroll speed handed to the capture engine (px/s).
    pub scroll_speed: u32,
    /// Deadline for the scroll-and-record phase of one attempt.
    pub capture_timeout: Duration,
    /// Retries for transient failures before a job goes terminal.
    pub max_retries: u32,
    /// Concurrent capture sessions per dispatcher instance.
    pub max_concurrent_captures: usize,
    /// Whether to process notifications at all.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scroll_speed: defaults::SCROLL_SPEED,
            capture_timeout: Duration::from_secs(defaults::CAPTURE_TIMEOUT_SECS),
            max_retries: defaults::CAPTURE_MAX_RETRIES,
            max_concurrent_captures: defaults::MAX_CONCURRENT_CAPTURES,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WORKER_ENABLED` | `true` | Enable/disable notification handling |
    /// | `CAPTURE_SCROLL_SPEED` | `300` | Scroll speed in px/s |
    /// | `CAPTURE_TIMEOUT_SECS` | `180` | Per-attempt capture deadline |
    /// | `CAPTURE_MAX_RETRIES` | `2` | Transient-failure retries |
    /// | `MAX_CONCURRENT_CAPTURES` | `2` | Browser sessions in flight |
    pub fn from_env() -> Self {
        let enabled = std::env::var("WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let scroll_speed = std::env::var("CAPTURE_SCROLL_SPEED")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(defaults::SCROLL_SPEED);

        let capture_timeout_secs = std::env::var("CAPTURE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::CAPTURE_TIMEOUT_SECS);

        let max_retries = std::env::var("CAPTURE_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(defaults::CAPTURE_MAX_RETRIES);

        let max_concurrent_captures = std::env::var("MAX_CONCURRENT_CAPTURES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::MAX_CONCURRENT_CAPTURES)
            .max(1);

        Self {
            scroll_speed,
            capture_timeout: Duration::from_secs(capture_timeout_secs),
            max_retries,
            max_concurrent_captures,
            enabled,
        }
    }

    /// Set the scroll speed.
    pub fn with_scroll_speed(mut self, speed: u32) -> Self {
        self.scroll_speed = speed;
        self
    }

    /// Set the per-attempt capture deadline.
    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    /// Set the transient-failure retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set maximum concurrent capture sessions.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_captures = max.max(1);
        self
    }

    /// Enable or disable notification handling.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.scroll_speed, 300);
        assert_eq!(config.capture_timeout, Duration::from_secs(180));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.max_concurrent_captures, 2);
        assert!(config.enabled);
    }

    #[test]
    fn test_config_builder_chaining() {
        let config = WorkerConfig::default()
            .with_scroll_speed(600)
            .with_capture_timeout(Duration::from_secs(30))
            .with_max_retries(0)
            .with_max_concurrent(8)
            .with_enabled(false);

        assert_eq!(config.scroll_speed, 600);
        assert_eq!(config.capture_timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.max_concurrent_captures, 8);
        assert!(!config.enabled);
    }

    #[test]
    fn test_config_concurrency_floor() {
        let config = WorkerConfig::default().with_max_concurrent(0);
        assert_eq!(config.max_concurrent_captures, 1);
    }
}
