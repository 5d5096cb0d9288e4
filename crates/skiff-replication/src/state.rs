//! Durable per-version replication state.
//!
//! The state store is the single source of truth for "has this version
//! replicated?". This module defines the record schema and the transition
//! contract; physical persistence is delegated to whatever durable
//! key-value collaborator implements [`StateStore`]. An in-memory
//! implementation ships here for tests and single-node deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use skiff_core::ReplicationStatus;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{ReplicationError, Result};

/// Persisted replication state for one object version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationRecord {
    /// Source object key.
    pub object_key: String,
    /// Source version id.
    pub version_id: String,
    /// Current replication status.
    pub status: ReplicationStatus,
    /// Copy attempts made so far.
    pub attempts: u32,
    /// Message of the most recent failure, if any.
    pub last_error: Option<String>,
    /// When replication was first scheduled.
    pub enqueued_at: DateTime<Utc>,
    /// When the most recent copy attempt ran, if any.
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl ReplicationRecord {
    /// Creates a PENDING record for a newly scheduled version.
    #[must_use]
    pub fn pending(object_key: impl Into<String>, version_id: impl Into<String>) -> Self {
        Self {
            object_key: object_key.into(),
            version_id: version_id.into(),
            status: ReplicationStatus::Pending,
            attempts: 0,
            last_error: None,
            enqueued_at: Utc::now(),
            last_attempt_at: None,
        }
    }

    /// Creates a REPLICA record for an object written by the pipeline on
    /// the destination side. Set once, never transitioned.
    #[must_use]
    pub fn replica(object_key: impl Into<String>, version_id: impl Into<String>) -> Self {
        Self {
            object_key: object_key.into(),
            version_id: version_id.into(),
            status: ReplicationStatus::Replica,
            attempts: 0,
            last_error: None,
            enqueued_at: Utc::now(),
            last_attempt_at: None,
        }
    }
}

/// Returns whether the schema permits moving a version from `from`
/// (`None` = no record yet) to `to`.
///
/// Permitted: absent -> PENDING, absent -> REPLICA (destination side),
/// PENDING -> PENDING (retry), PENDING -> COMPLETED, PENDING -> FAILED.
/// COMPLETED and FAILED are terminal; REPLICA is set once.
#[must_use]
pub fn transition_allowed(from: Option<ReplicationStatus>, to: ReplicationStatus) -> bool {
    match from {
        None => matches!(to, ReplicationStatus::Pending | ReplicationStatus::Replica),
        Some(ReplicationStatus::Pending) => !matches!(to, ReplicationStatus::Replica),
        Some(ReplicationStatus::Completed)
        | Some(ReplicationStatus::Failed)
        | Some(ReplicationStatus::Replica) => false,
    }
}

/// Durable store of per-version replication state.
///
/// All mutation is serialized per `(object_key, version_id)` through the
/// compare-and-set `transition`, so two workers can never both finalize
/// the same version.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads the record for a version, if one exists.
    async fn get(&self, object_key: &str, version_id: &str)
        -> Result<Option<ReplicationRecord>>;

    /// Writes a record for a version that has none yet (or whose current
    /// record the new one may legally replace).
    ///
    /// Returns [`ReplicationError::InvalidTransition`] when the write
    /// would move the version out of a terminal state or re-tag a
    /// replica.
    async fn put(&self, record: ReplicationRecord) -> Result<()>;

    /// Compare-and-set transition of a version's status.
    ///
    /// Fails with [`ReplicationError::Conflict`] when the current status
    /// is not `expected` (or no record exists), and with
    /// [`ReplicationError::InvalidTransition`] when the schema forbids
    /// `expected -> new`.
    async fn transition(
        &self,
        object_key: &str,
        version_id: &str,
        expected: ReplicationStatus,
        new: ReplicationStatus,
    ) -> Result<()>;

    /// Records one more failed attempt on a PENDING version: bumps the
    /// attempt counter, stamps `last_attempt_at`, and stores the error
    /// message. The PENDING -> PENDING retry transition.
    async fn record_attempt(
        &self,
        object_key: &str,
        version_id: &str,
        error: Option<&str>,
    ) -> Result<()>;
}

/// In-memory state store for tests and single-node deployments.
///
/// Carries an availability toggle so tests can simulate a store outage:
/// while unavailable, every call returns
/// [`ReplicationError::StoreUnavailable`].
#[derive(Default)]
pub struct MemoryStateStore {
    records: DashMap<(String, String), ReplicationRecord>,
    unavailable: AtomicBool,
}

impl MemoryStateStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggles simulated availability.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(ReplicationError::StoreUnavailable { reason: "simulated outage".to_string() })
        } else {
            Ok(())
        }
    }

    fn key(object_key: &str, version_id: &str) -> (String, String) {
        (object_key.to_string(), version_id.to_string())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(
        &self,
        object_key: &str,
        version_id: &str,
    ) -> Result<Option<ReplicationRecord>> {
        self.check_available()?;
        Ok(self.records.get(&Self::key(object_key, version_id)).map(|r| r.clone()))
    }

    async fn put(&self, record: ReplicationRecord) -> Result<()> {
        self.check_available()?;
        let key = Self::key(&record.object_key, &record.version_id);
        let current = self.records.get(&key).map(|r| r.status);
        if !transition_allowed(current, record.status) {
            return Err(ReplicationError::InvalidTransition {
                // Unwrap is safe: every absent -> PENDING/REPLICA write is allowed.
                from: current.unwrap_or(record.status),
                to: record.status,
            });
        }
        self.records.insert(key, record);
        Ok(())
    }

    async fn transition(
        &self,
        object_key: &str,
        version_id: &str,
        expected: ReplicationStatus,
        new: ReplicationStatus,
    ) -> Result<()> {
        self.check_available()?;
        let key = Self::key(object_key, version_id);
        let Some(mut entry) = self.records.get_mut(&key) else {
            return Err(ReplicationError::Conflict { expected, actual: expected });
        };
        if entry.status != expected {
            return Err(ReplicationError::Conflict { expected, actual: entry.status });
        }
        if !transition_allowed(Some(expected), new) {
            return Err(ReplicationError::InvalidTransition { from: expected, to: new });
        }
        entry.status = new;
        Ok(())
    }

    async fn record_attempt(
        &self,
        object_key: &str,
        version_id: &str,
        error: Option<&str>,
    ) -> Result<()> {
        self.check_available()?;
        let key = Self::key(object_key, version_id);
        let Some(mut entry) = self.records.get_mut(&key) else {
            return Err(ReplicationError::Conflict {
                expected: ReplicationStatus::Pending,
                actual: ReplicationStatus::Pending,
            });
        };
        if entry.status != ReplicationStatus::Pending {
            return Err(ReplicationError::Conflict {
                expected: ReplicationStatus::Pending,
                actual: entry.status,
            });
        }
        entry.attempts += 1;
        entry.last_attempt_at = Some(Utc::now());
        entry.last_error = error.map(str::to_string);
        Ok(())
    }
}
