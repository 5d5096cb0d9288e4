//! The unit of work handed to the replication pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skiff_core::replication::MatchedRule;
use uuid::Uuid;

/// Unique identifier for a replication task.
pub type TaskId = Uuid;

/// A single object version scheduled for replication to one destination.
///
/// Created when the rule matcher selects a rule for a write; owned
/// exclusively by the pipeline until it reaches a terminal state. Tasks
/// for the same key are applied to the destination in `sequence` order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationTask {
    /// Unique ID for this task.
    pub id: TaskId,

    /// Bucket the source version lives in.
    pub source_bucket: String,

    /// Source object key.
    pub object_key: String,

    /// Source version id.
    pub version_id: String,

    /// Monotonic per-key sequence of the source version. Used for the
    /// idempotency guard at the destination: a replica at or past this
    /// sequence means the copy already happened.
    pub sequence: u64,

    /// Id of the rule that matched.
    pub rule_id: String,

    /// Destination bucket ARN.
    pub destination_bucket: String,

    /// Storage class configured on the rule; `None` means the pipeline
    /// default applies.
    pub storage_class: Option<String>,

    /// Copy attempts made so far.
    pub attempts: u32,

    /// Message of the most recent failure, if any.
    pub last_error: Option<String>,

    /// When the task was accepted by the pipeline.
    pub enqueued_at: DateTime<Utc>,

    /// When the most recent copy attempt started, if any.
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl ReplicationTask {
    /// Creates a task from a matched rule and the written version's
    /// identity.
    #[must_use]
    pub fn new(
        source_bucket: impl Into<String>,
        object_key: impl Into<String>,
        version_id: impl Into<String>,
        sequence: u64,
        rule: &MatchedRule,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_bucket: source_bucket.into(),
            object_key: object_key.into(),
            version_id: version_id.into(),
            sequence,
            rule_id: rule.rule_id.clone(),
            destination_bucket: rule.destination_bucket.clone(),
            storage_class: rule.storage_class.clone(),
            attempts: 0,
            last_error: None,
            enqueued_at: Utc::now(),
            last_attempt_at: None,
        }
    }

    /// Resolves the storage class to write the replica with.
    #[must_use]
    pub fn effective_storage_class<'a>(&'a self, default: &'a str) -> &'a str {
        self.storage_class.as_deref().unwrap_or(default)
    }
}

/// Terminal disposition of one pass over a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The replica is in place and the version is COMPLETED.
    Completed,
    /// A retryable failure occurred; the task will run again after the
    /// given backoff.
    RetryScheduled {
        /// Delay before the next attempt.
        after: std::time::Duration,
    },
    /// The version is FAILED and will not be retried.
    FailedTerminal,
}
