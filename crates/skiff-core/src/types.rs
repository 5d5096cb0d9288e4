// Copyright 2026 The Skiff Authors
// SPDX-License-Identifier: Apache-2.0

//! Common types used throughout Skiff.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An S3 ETag value.
///
/// ETags are MD5 hashes of object content for single-part uploads,
/// or `MD5(concat(part_md5s))-{num_parts}` for multipart uploads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ETag(String);

impl ETag {
    /// Creates a new ETag from a string value.
    ///
    /// The value should be quoted (e.g., `"d41d8cd98f00b204e9800998ecf8427e"`).
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Creates an ETag from an MD5 hash (single-part upload).
    #[must_use]
    pub fn from_md5(hash: &[u8; 16]) -> Self {
        Self(format!("\"{}\"", hex::encode(hash)))
    }

    /// Returns the ETag value as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ETag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ETag {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ETag {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Replication status of a single object version.
///
/// The status lives in the object's metadata record and is the single
/// source of truth for "has this version replicated?". `Replica` marks an
/// object that was itself written by the replication pipeline; such
/// objects are never evaluated for further replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationStatus {
    /// Replication has been scheduled but has not completed.
    Pending,
    /// The version was copied to its destination.
    Completed,
    /// Replication gave up after exhausting retries or hit a permanent
    /// destination error.
    Failed,
    /// The object is itself a replica written by the pipeline.
    Replica,
}

impl ReplicationStatus {
    /// Parse from the S3 wire representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "REPLICA" => Some(Self::Replica),
            _ => None,
        }
    }

    /// Convert to the S3 wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Replica => "REPLICA",
        }
    }

    /// Returns true if no further transition is permitted from this status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ReplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metadata for an object version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Object key.
    pub key: String,
    /// Version ID of this object version.
    pub version_id: String,
    /// Monotonic per-key sequence number assigned by the versioning layer
    /// when the version was written. Later writes to the same key always
    /// carry a larger sequence.
    pub sequence: u64,
    /// Object size in bytes.
    pub size: u64,
    /// Object ETag.
    pub etag: ETag,
    /// Content type (MIME type).
    pub content_type: Option<String>,
    /// When the object was last modified.
    pub last_modified: DateTime<Utc>,
    /// Replication status of this version, if any.
    #[serde(default)]
    pub replication_status: Option<ReplicationStatus>,
    /// Custom user metadata.
    #[serde(default)]
    pub user_metadata: HashMap<String, String>,
}

impl ObjectMetadata {
    /// Creates new object metadata.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        version_id: impl Into<String>,
        sequence: u64,
        size: u64,
        etag: ETag,
    ) -> Self {
        Self {
            key: key.into(),
            version_id: version_id.into(),
            sequence,
            size,
            etag,
            content_type: None,
            last_modified: Utc::now(),
            replication_status: None,
            user_metadata: HashMap::new(),
        }
    }

    /// Returns true if this version was written by the replication
    /// pipeline and must not be replicated again.
    #[must_use]
    pub fn is_replica(&self) -> bool {
        self.replication_status == Some(ReplicationStatus::Replica)
    }

    /// Returns a copy of this metadata tagged as a replica.
    #[must_use]
    pub fn as_replica(mut self) -> Self {
        self.replication_status = Some(ReplicationStatus::Replica);
        self
    }
}
