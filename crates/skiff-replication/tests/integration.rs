//! Integration tests for the replication pipeline.
//!
//! These exercise the public surface end to end: bucket configuration
//! validation, rule matching on a write, enqueueing, and delivery through
//! a mock storage backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use skiff_core::replication::ReplicationConfigurationDocument;
use skiff_core::replication::ValidationPolicy;
use skiff_core::{ETag, ObjectMetadata, ReplicationStatus};
use skiff_replication::{
    evaluate_write, BackendClient, MemoryStateStore, PipelineConfig, ReplicationError,
    ReplicationPipeline, ReplicationTask, SourceObject, StateStore, WrittenReplica,
};
use tokio::time::{sleep, Instant};

/// Mock backend shared by the tests: in-memory sources and replicas,
/// with per-key permanent write failures.
#[derive(Default)]
struct TestBackend {
    sources: DashMap<(String, String, String), SourceObject>,
    replicas: DashMap<(String, String), (u64, Bytes)>,
    failing_keys: DashSet<String>,
    writes: AtomicUsize,
}

impl TestBackend {
    fn add_source(&self, bucket: &str, key: &str, version: &str, sequence: u64, body: &str) {
        let metadata = ObjectMetadata::new(
            key,
            version,
            sequence,
            body.len() as u64,
            ETag::new("\"test\""),
        );
        self.sources.insert(
            (bucket.to_string(), key.to_string(), version.to_string()),
            SourceObject { data: Bytes::from(body.to_string()), metadata },
        );
    }

    fn replica(&self, bucket: &str, key: &str) -> Option<(u64, String)> {
        self.replicas
            .get(&(bucket.to_string(), key.to_string()))
            .map(|r| (r.0, String::from_utf8_lossy(&r.1).to_string()))
    }
}

#[async_trait]
impl BackendClient for TestBackend {
    async fn read_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
    ) -> Result<SourceObject, ReplicationError> {
        self.sources
            .get(&(bucket.to_string(), key.to_string(), version_id.to_string()))
            .map(|s| s.clone())
            .ok_or_else(|| ReplicationError::SourceGone {
                key: key.to_string(),
                version_id: version_id.to_string(),
            })
    }

    async fn write_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        metadata: ObjectMetadata,
        _storage_class: &str,
    ) -> Result<WrittenReplica, ReplicationError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.failing_keys.contains(key) {
            return Err(ReplicationError::AccessDenied { bucket: bucket.to_string() });
        }
        self.replicas
            .insert((bucket.to_string(), key.to_string()), (metadata.sequence, data));
        Ok(WrittenReplica { version_id: format!("replica-{}", metadata.version_id) })
    }

    async fn replica_sequence(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<u64>, ReplicationError> {
        Ok(self.replicas.get(&(bucket.to_string(), key.to_string())).map(|r| r.0))
    }
}

fn fast_config() -> PipelineConfig {
    PipelineConfig::new()
        .queue_size(64)
        .lanes_per_destination(2)
        .max_attempts(3)
        .initial_backoff(Duration::from_millis(1))
        .max_backoff(Duration::from_millis(5))
        .attempt_timeout(Duration::from_secs(5))
}

/// A typical PutBucketReplication body, as parsed from the wire.
fn bucket_config() -> ReplicationConfigurationDocument {
    let xml = r#"<ReplicationConfiguration>
        <Role>arn:aws:iam::123456789012:role/replication</Role>
        <Rule>
            <ID>logs-to-archive</ID>
            <Prefix>logs/</Prefix>
            <Status>Enabled</Status>
            <Destination>
                <Bucket>arn:aws:s3:::archive</Bucket>
                <StorageClass>STANDARD_IA</StorageClass>
            </Destination>
        </Rule>
        <Rule>
            <ID>all-logs</ID>
            <Prefix>logs</Prefix>
            <Status>Enabled</Status>
            <Destination>
                <Bucket>arn:aws:s3:::mirror</Bucket>
            </Destination>
        </Rule>
    </ReplicationConfiguration>"#;
    quick_xml::de::from_str(xml).expect("fixture XML parses")
}

async fn wait_for_status(
    store: &MemoryStateStore,
    key: &str,
    version: &str,
    want: ReplicationStatus,
) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(Some(record)) = store.get(key, version).await {
            if record.status == want {
                return;
            }
        }
        assert!(Instant::now() < deadline, "timed out waiting for {key}@{version} -> {want}");
        sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_write_to_delivery_end_to_end() {
    let config = bucket_config().validate(&ValidationPolicy::default()).unwrap();

    let store = Arc::new(MemoryStateStore::new());
    let backend = Arc::new(TestBackend::default());
    backend.add_source("photos", "logs/app.log", "v1", 1, "log line");

    let pipeline = ReplicationPipeline::new(fast_config(), store.clone(), backend.clone()).unwrap();

    // An incoming write hits the matcher; the longest matching prefix wins.
    let metadata = ObjectMetadata::new("logs/app.log", "v1", 1, 8, ETag::new("\"e\""));
    let rule = evaluate_write(&metadata, &config).expect("a rule matches");
    assert_eq!(rule.rule_id, "logs-to-archive");
    assert_eq!(rule.storage_class.as_deref(), Some("STANDARD_IA"));

    let task = ReplicationTask::new("photos", &metadata.key, &metadata.version_id, 1, &rule);
    pipeline.enqueue(task).await.unwrap();

    wait_for_status(&store, "logs/app.log", "v1", ReplicationStatus::Completed).await;
    let (sequence, body) = backend.replica(&rule.destination_bucket, "logs/app.log").unwrap();
    assert_eq!(sequence, 1);
    assert_eq!(body, "log line");
}

#[tokio::test]
async fn test_replicas_are_never_re_replicated() {
    let config = bucket_config().validate(&ValidationPolicy::default()).unwrap();

    // A write the pipeline itself made on the destination side.
    let metadata =
        ObjectMetadata::new("logs/app.log", "v1", 1, 8, ETag::new("\"e\"")).as_replica();
    assert!(evaluate_write(&metadata, &config).is_none());
}

#[tokio::test]
async fn test_re_enqueue_of_completed_version_is_a_no_op() {
    let store = Arc::new(MemoryStateStore::new());
    let backend = Arc::new(TestBackend::default());
    backend.add_source("src", "logs/app.log", "v1", 1, "body");

    let config_doc = bucket_config().validate(&ValidationPolicy::default()).unwrap();
    let rule = config_doc.match_rule("logs/app.log").unwrap();
    let pipeline = ReplicationPipeline::new(fast_config(), store.clone(), backend.clone()).unwrap();

    pipeline
        .enqueue(ReplicationTask::new("src", "logs/app.log", "v1", 1, &rule))
        .await
        .unwrap();
    wait_for_status(&store, "logs/app.log", "v1", ReplicationStatus::Completed).await;
    let writes = backend.writes.load(Ordering::SeqCst);

    // The same task delivered again, e.g. replayed from a journal after a
    // restart. The version is already resolved, so the enqueue succeeds
    // without scheduling anything.
    pipeline
        .enqueue(ReplicationTask::new("src", "logs/app.log", "v1", 1, &rule))
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;

    let record = store.get("logs/app.log", "v1").await.unwrap().unwrap();
    assert_eq!(record.status, ReplicationStatus::Completed);
    assert_eq!(backend.writes.load(Ordering::SeqCst), writes);
}

#[tokio::test]
async fn test_poisoned_key_does_not_block_others() {
    let store = Arc::new(MemoryStateStore::new());
    let backend = Arc::new(TestBackend::default());
    backend.failing_keys.insert("logs/poison".to_string());
    for key in ["logs/poison", "logs/a", "logs/b", "logs/c"] {
        backend.add_source("src", key, "v1", 1, "body");
    }

    // One lane, so every key shares a queue with the poisoned one.
    let config = fast_config().lanes_per_destination(1);
    let pipeline = ReplicationPipeline::new(config, store.clone(), backend.clone()).unwrap();

    let config_doc = bucket_config().validate(&ValidationPolicy::default()).unwrap();
    for key in ["logs/poison", "logs/a", "logs/b", "logs/c"] {
        let rule = config_doc.match_rule(key).unwrap();
        pipeline.enqueue(ReplicationTask::new("src", key, "v1", 1, &rule)).await.unwrap();
    }

    // The poisoned key exhausts its attempts and fails terminally; the
    // healthy keys behind it in the lane still complete.
    wait_for_status(&store, "logs/poison", "v1", ReplicationStatus::Failed).await;
    for key in ["logs/a", "logs/b", "logs/c"] {
        wait_for_status(&store, key, "v1", ReplicationStatus::Completed).await;
    }
}

#[tokio::test]
async fn test_same_key_versions_arrive_in_order() {
    let store = Arc::new(MemoryStateStore::new());
    let backend = Arc::new(TestBackend::default());
    for (version, sequence, body) in [("v1", 1, "one"), ("v2", 2, "two"), ("v3", 3, "three")] {
        backend.add_source("src", "logs/app.log", version, sequence, body);
    }

    let config_doc = bucket_config().validate(&ValidationPolicy::default()).unwrap();
    let rule = config_doc.match_rule("logs/app.log").unwrap();
    let pipeline = ReplicationPipeline::new(fast_config(), store.clone(), backend.clone()).unwrap();

    for (version, sequence) in [("v1", 1), ("v2", 2), ("v3", 3)] {
        pipeline
            .enqueue(ReplicationTask::new("src", "logs/app.log", version, sequence, &rule))
            .await
            .unwrap();
    }

    for version in ["v1", "v2", "v3"] {
        wait_for_status(&store, "logs/app.log", version, ReplicationStatus::Completed).await;
    }
    let (sequence, body) = backend.replica(&rule.destination_bucket, "logs/app.log").unwrap();
    assert_eq!(sequence, 3);
    assert_eq!(body, "three");
}

#[tokio::test]
async fn test_shutdown_preserves_pending_records() {
    let store = Arc::new(MemoryStateStore::new());
    let backend = Arc::new(TestBackend::default());
    for i in 0..8 {
        backend.add_source("src", &format!("logs/{i}"), "v1", 1, "body");
    }

    let config_doc = bucket_config().validate(&ValidationPolicy::default()).unwrap();
    let pipeline = ReplicationPipeline::new(
        fast_config().lanes_per_destination(1),
        store.clone(),
        backend.clone(),
    )
    .unwrap();

    for i in 0..8 {
        let key = format!("logs/{i}");
        let rule = config_doc.match_rule(&key).unwrap();
        pipeline.enqueue(ReplicationTask::new("src", &key, "v1", 1, &rule)).await.unwrap();
    }
    pipeline.shutdown().await;

    // New work is refused after shutdown.
    let rule = config_doc.match_rule("logs/late").unwrap();
    let err = pipeline
        .enqueue(ReplicationTask::new("src", "logs/late", "v1", 1, &rule))
        .await
        .unwrap_err();
    assert!(matches!(err, ReplicationError::Shutdown));

    // Every accepted version still has a record: either it completed, or
    // its PENDING marker survives for resumption after restart.
    for i in 0..8 {
        let record = store.get(&format!("logs/{i}"), "v1").await.unwrap().unwrap();
        assert!(matches!(
            record.status,
            ReplicationStatus::Completed | ReplicationStatus::Pending
        ));
    }
}
