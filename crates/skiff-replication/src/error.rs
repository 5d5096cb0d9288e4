//! Error types for the replication pipeline.

use skiff_core::ReplicationStatus;
use thiserror::Error;

/// Result type for replication pipeline operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur while replicating an object version.
#[derive(Error, Debug, Clone)]
pub enum ReplicationError {
    /// Transient transport failure talking to the backend (connection
    /// reset, destination throttling, and the like). Retried with backoff.
    #[error("transient transport failure: {reason}")]
    Transport {
        /// The reason for failure.
        reason: String,
    },

    /// A single copy attempt exceeded its deadline. Retried with backoff.
    #[error("replication attempt timed out after {timeout_ms}ms")]
    AttemptTimeout {
        /// The attempt deadline in milliseconds.
        timeout_ms: u64,
    },

    /// The destination bucket is missing or was deleted. Permanent.
    #[error("destination bucket {bucket} does not exist")]
    DestinationMissing {
        /// The missing destination bucket.
        bucket: String,
    },

    /// The replication role is not permitted to write to the destination.
    /// Permanent.
    #[error("access denied writing to destination bucket {bucket}")]
    AccessDenied {
        /// The destination bucket.
        bucket: String,
    },

    /// The replica's checksum did not match the source. Permanent.
    #[error("replica checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Checksum of the source object.
        expected: String,
        /// Checksum reported for the replica.
        actual: String,
    },

    /// The source version disappeared before it could be copied. Permanent.
    #[error("source version {version_id} of {key} no longer exists")]
    SourceGone {
        /// The source object key.
        key: String,
        /// The source version id.
        version_id: String,
    },

    /// The replication state store is unreachable. The task stays PENDING
    /// and is retried once the store recovers; it is never abandoned.
    #[error("replication state store unavailable: {reason}")]
    StoreUnavailable {
        /// The reason the store is unreachable.
        reason: String,
    },

    /// The replication queue for a destination is at capacity. Surfaced
    /// to the write path as backpressure.
    #[error("replication queue full: {pending_items} items pending")]
    QueueFull {
        /// Number of items pending in the queue.
        pending_items: usize,
    },

    /// A compare-and-set on the state store found a different current
    /// status than expected.
    #[error("state conflict: expected {expected}, found {actual}")]
    Conflict {
        /// The status the caller expected.
        expected: ReplicationStatus,
        /// The status actually recorded.
        actual: ReplicationStatus,
    },

    /// A state transition that the schema forbids.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        /// The current status.
        from: ReplicationStatus,
        /// The requested status.
        to: ReplicationStatus,
    },

    /// The pipeline is shutting down and no longer accepts work.
    #[error("replication pipeline is shut down")]
    Shutdown,
}

impl ReplicationError {
    /// Returns true if the failure is transient and the attempt should be
    /// rescheduled with backoff.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::AttemptTimeout { .. })
    }
}
