//! Asynchronous cross-bucket replication for Skiff object storage.
//!
//! This crate is the delivery half of bucket replication: it takes object
//! versions the rule matcher selected (see `skiff_core::replication`) and
//! copies them to their destination buckets in the background, off the
//! write path.
//!
//! # Architecture
//!
//! ```text
//! Object Write
//!      │
//!      ▼
//! evaluate_write ── REPLICA or no rule ──► (not replicated)
//!      │
//!      │ matched rule
//!      ▼
//! ┌──────────────────┐    PENDING     ┌─────────────┐
//! │ enqueue          │───────────────►│ State Store │
//! └────────┬─────────┘                └─────────────┘
//!          │ hash(key) % lanes                ▲
//!          ▼                                  │ COMPLETED / FAILED
//! ┌──────────────────┐                        │
//! │ lane queue       │  one worker per lane   │
//! │ (bounded, FIFO)  │───────────────────────►│
//! └──────────────────┘   read source,         │
//!                        write replica        │
//!                        (retry w/ backoff)   │
//! ```
//!
//! All tasks for one key hash to the same lane, so versions of a key
//! reach the destination in order; different keys spread across lanes and
//! run in parallel. A full lane pushes back on the caller instead of
//! buffering unbounded work.
//!
//! # Example
//!
//! ```ignore
//! use skiff_replication::{evaluate_write, PipelineConfig, ReplicationPipeline, ReplicationTask};
//!
//! let pipeline = ReplicationPipeline::new(
//!     PipelineConfig::new().lanes_per_destination(4),
//!     state_store,
//!     backend_client,
//! )?;
//!
//! // On each object write:
//! if let Some(rule) = evaluate_write(&metadata, &bucket_replication_config) {
//!     let task = ReplicationTask::new(bucket, &metadata.key, &metadata.version_id,
//!         metadata.sequence, &rule);
//!     pipeline.enqueue(task).await?;
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod config;
mod error;
mod pipeline;
mod state;
mod task;

// Re-export the backend collaborator trait
pub use backend::{BackendClient, SourceObject, WrittenReplica};
// Re-export configuration
pub use config::{
    PipelineConfig, PipelineConfigError, DEFAULT_ATTEMPT_TIMEOUT_MS, DEFAULT_DRAIN_GRACE_MS,
    DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_LANES_PER_DESTINATION, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_BACKOFF_MS, DEFAULT_QUEUE_SIZE,
};
// Re-export error types
pub use error::{ReplicationError, Result};
// Re-export the pipeline
pub use pipeline::{evaluate_write, FailedReplication, ReplicationPipeline};
// Re-export state store types
pub use state::{transition_allowed, MemoryStateStore, ReplicationRecord, StateStore};
// Re-export the task types
pub use task::{ReplicationTask, TaskId, TaskOutcome};
