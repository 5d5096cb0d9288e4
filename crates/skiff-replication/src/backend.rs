//! Backend client trait consumed by replication workers.
//!
//! The pipeline never touches storage directly; it reads source bytes and
//! writes replicas through this collaborator, which the hosting service
//! implements over its data path (local volumes, a remote region, another
//! cluster).

use async_trait::async_trait;
use bytes::Bytes;
use skiff_core::ObjectMetadata;

use crate::error::Result;

/// A source object's bytes and metadata, as read for copying.
#[derive(Debug, Clone)]
pub struct SourceObject {
    /// Object payload.
    pub data: Bytes,
    /// Object metadata at the source.
    pub metadata: ObjectMetadata,
}

/// Result of writing a replica to a destination bucket.
#[derive(Debug, Clone)]
pub struct WrittenReplica {
    /// Version id assigned to the replica by the destination.
    pub version_id: String,
}

/// Client for the storage backend used by replication workers.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Reads one version of a source object.
    ///
    /// A missing version surfaces as
    /// [`ReplicationError::SourceGone`](crate::ReplicationError::SourceGone).
    async fn read_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
    ) -> Result<SourceObject>;

    /// Writes a replica into `bucket` with the given storage class. The
    /// metadata passed in is already tagged `REPLICA` so the destination
    /// side never re-replicates it.
    async fn write_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        metadata: ObjectMetadata,
        storage_class: &str,
    ) -> Result<WrittenReplica>;

    /// Returns the source sequence the destination currently holds for
    /// `key`, or `None` if no replica exists yet. Workers use this to
    /// skip copies that already happened and to refuse to overwrite a
    /// newer replica with a stale one.
    async fn replica_sequence(&self, bucket: &str, key: &str) -> Result<Option<u64>>;
}
