//! Configuration for the replication pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use skiff_core::replication::DEFAULT_STORAGE_CLASS;

/// Default capacity of each per-destination lane queue.
pub const DEFAULT_QUEUE_SIZE: usize = 1_000;

/// Default number of lanes (parallel workers) per destination bucket.
pub const DEFAULT_LANES_PER_DESTINATION: usize = 8;

/// Default maximum copy attempts before a task fails terminally.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default initial retry backoff in milliseconds.
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 200;

/// Default backoff cap in milliseconds.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

/// Default deadline for a single copy attempt in milliseconds.
pub const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 60_000;

/// Default grace period for draining in-flight tasks on shutdown (ms).
pub const DEFAULT_DRAIN_GRACE_MS: u64 = 10_000;

/// Configuration for the replication pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of each lane queue. Enqueue returns backpressure when a
    /// lane is at capacity rather than buffering unbounded work.
    pub queue_size: usize,

    /// Number of lanes per destination bucket. A lane serializes all
    /// tasks for the keys hashed onto it; lanes run in parallel.
    pub lanes_per_destination: usize,

    /// Maximum copy attempts (initial attempt included) before the
    /// version transitions to FAILED.
    pub max_attempts: u32,

    /// Initial retry backoff in milliseconds; doubles per attempt.
    pub initial_backoff_ms: u64,

    /// Upper bound on the retry backoff in milliseconds.
    pub max_backoff_ms: u64,

    /// Deadline for a single copy attempt in milliseconds. Exceeding it
    /// counts as a retryable failure.
    pub attempt_timeout_ms: u64,

    /// How long shutdown waits for in-flight tasks before cancelling.
    pub drain_grace_ms: u64,

    /// Storage class applied when a rule leaves it unspecified.
    pub default_storage_class: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            lanes_per_destination: DEFAULT_LANES_PER_DESTINATION,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            attempt_timeout_ms: DEFAULT_ATTEMPT_TIMEOUT_MS,
            drain_grace_ms: DEFAULT_DRAIN_GRACE_MS,
            default_storage_class: DEFAULT_STORAGE_CLASS.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Creates a new pipeline configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-lane queue capacity.
    #[must_use]
    pub fn queue_size(mut self, size: usize) -> Self {
        self.queue_size = size;
        self
    }

    /// Sets the number of lanes per destination.
    #[must_use]
    pub fn lanes_per_destination(mut self, lanes: usize) -> Self {
        self.lanes_per_destination = lanes;
        self
    }

    /// Sets the maximum number of copy attempts.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the initial retry backoff.
    #[must_use]
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Sets the backoff cap.
    #[must_use]
    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Sets the per-attempt deadline.
    #[must_use]
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the shutdown drain grace period.
    #[must_use]
    pub fn drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Sets the storage class used when a rule leaves it unspecified.
    #[must_use]
    pub fn default_storage_class(mut self, class: impl Into<String>) -> Self {
        self.default_storage_class = class.into();
        self
    }

    /// Returns the per-attempt deadline as a Duration.
    #[must_use]
    pub fn attempt_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Returns the drain grace period as a Duration.
    #[must_use]
    pub fn drain_grace_duration(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    /// Returns the backoff before retry number `attempt` (1-based),
    /// doubling from the initial backoff and capped. Jitter is applied by
    /// the worker at sleep time, not here.
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64.checked_shl(exp).unwrap_or(u64::MAX))
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), PipelineConfigError> {
        if self.queue_size == 0 {
            return Err(PipelineConfigError::InvalidQueueSize);
        }
        if self.lanes_per_destination == 0 {
            return Err(PipelineConfigError::InvalidLaneCount);
        }
        if self.max_attempts == 0 {
            return Err(PipelineConfigError::InvalidMaxAttempts);
        }
        if self.attempt_timeout_ms == 0 {
            return Err(PipelineConfigError::InvalidTimeout);
        }
        Ok(())
    }
}

/// Errors from pipeline configuration validation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineConfigError {
    /// Queue size must be at least 1.
    #[error("queue size must be at least 1")]
    InvalidQueueSize,

    /// Lane count must be at least 1.
    #[error("lanes per destination must be at least 1")]
    InvalidLaneCount,

    /// Max attempts must be at least 1.
    #[error("max attempts must be at least 1")]
    InvalidMaxAttempts,

    /// Attempt timeout must be positive.
    #[error("attempt timeout must be positive")]
    InvalidTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.queue_size, DEFAULT_QUEUE_SIZE);
        assert_eq!(config.lanes_per_destination, DEFAULT_LANES_PER_DESTINATION);
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.default_storage_class, "STANDARD");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = PipelineConfig::new()
            .queue_size(64)
            .lanes_per_destination(2)
            .max_attempts(3)
            .initial_backoff(Duration::from_millis(10))
            .max_backoff(Duration::from_millis(100))
            .attempt_timeout(Duration::from_secs(5))
            .drain_grace(Duration::from_secs(1))
            .default_storage_class("STANDARD_IA");

        assert_eq!(config.queue_size, 64);
        assert_eq!(config.lanes_per_destination, 2);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_backoff_ms, 10);
        assert_eq!(config.max_backoff_ms, 100);
        assert_eq!(config.attempt_timeout_ms, 5_000);
        assert_eq!(config.drain_grace_ms, 1_000);
        assert_eq!(config.default_storage_class, "STANDARD_IA");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = PipelineConfig::new()
            .initial_backoff(Duration::from_millis(100))
            .max_backoff(Duration::from_millis(500));

        assert_eq!(config.backoff_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.backoff_for_attempt(3), Duration::from_millis(400));
        assert_eq!(config.backoff_for_attempt(4), Duration::from_millis(500));
        assert_eq!(config.backoff_for_attempt(40), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_shift_overflow_saturates() {
        let config = PipelineConfig::new()
            .initial_backoff(Duration::from_millis(1))
            .max_backoff(Duration::from_millis(1_000));
        // Attempt numbers past the shift width still respect the cap.
        assert_eq!(config.backoff_for_attempt(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn test_validation() {
        assert!(PipelineConfig::default().validate().is_ok());
        assert!(PipelineConfig::new().queue_size(0).validate().is_err());
        assert!(PipelineConfig::new().lanes_per_destination(0).validate().is_err());
        assert!(PipelineConfig::new().max_attempts(0).validate().is_err());

        let config = PipelineConfig { attempt_timeout_ms: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = PipelineConfig::new().max_attempts(7).queue_size(11);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.max_attempts, 7);
        assert_eq!(parsed.queue_size, 11);
    }
}
