//! The replication queue and worker pool.
//!
//! Each destination bucket gets a fixed set of lanes. A lane is a bounded
//! queue drained by one dedicated worker, and a task's lane is chosen by
//! hashing its object key, so all tasks for a key run strictly in order
//! while different keys proceed in parallel across lanes and
//! destinations. Enqueueing into a full lane surfaces backpressure to the
//! write path instead of buffering unbounded work.
//!
//! The pipeline is an explicit, injected object: one instance per service,
//! built from a config, a state store handle, and a backend client. No
//! global state is involved, so the validator and matcher stay testable
//! without ever starting a pipeline.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use metrics::{counter, gauge, histogram};
use rand::Rng;
use skiff_core::replication::{MatchedRule, ReplicationConfiguration};
use skiff_core::{ObjectMetadata, ReplicationStatus};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::backend::BackendClient;
use crate::config::{PipelineConfig, PipelineConfigError};
use crate::error::{ReplicationError, Result};
use crate::state::{ReplicationRecord, StateStore};
use crate::task::{ReplicationTask, TaskOutcome};

/// Ceiling for the wait between state-store probes while the store is
/// unreachable. Separate from the copy-retry backoff: a store outage does
/// not consume copy attempts.
const STORE_RETRY_MAX: Duration = Duration::from_secs(5);
const STORE_RETRY_INITIAL: Duration = Duration::from_millis(100);

/// A task that reached FAILED, as delivered on the failure channel for
/// operational tooling.
#[derive(Debug, Clone)]
pub struct FailedReplication {
    /// The failed task, with its final attempt bookkeeping.
    pub task: ReplicationTask,
    /// The error that made the failure terminal.
    pub error: String,
}

/// Decides whether a freshly written object version should be replicated.
///
/// Objects the pipeline itself wrote are tagged `REPLICA` and are never
/// evaluated again, which is what breaks replication loops between
/// mutually replicating buckets.
#[must_use]
pub fn evaluate_write(
    metadata: &ObjectMetadata,
    config: &ReplicationConfiguration,
) -> Option<MatchedRule> {
    if metadata.is_replica() {
        return None;
    }
    config.match_rule(&metadata.key)
}

/// Everything a lane worker needs, shared across the pool.
struct Shared {
    config: PipelineConfig,
    store: Arc<dyn StateStore>,
    backend: Arc<dyn BackendClient>,
    failure_tx: mpsc::UnboundedSender<FailedReplication>,
    shutdown_rx: watch::Receiver<bool>,
}

/// The replication delivery pipeline: per-destination lane queues plus
/// the worker pool that drains them.
pub struct ReplicationPipeline {
    shared: Arc<Shared>,
    lanes: DashMap<String, Vec<mpsc::Sender<ReplicationTask>>>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    failure_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<FailedReplication>>>,
    shut_down: AtomicBool,
}

impl ReplicationPipeline {
    /// Creates a pipeline from a validated config and its two
    /// collaborators. Workers are spawned lazily, per destination, on
    /// first enqueue.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn StateStore>,
        backend: Arc<dyn BackendClient>,
    ) -> std::result::Result<Self, PipelineConfigError> {
        config.validate()?;
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            shared: Arc::new(Shared { config, store, backend, failure_tx, shutdown_rx }),
            lanes: DashMap::new(),
            workers: parking_lot::Mutex::new(Vec::new()),
            shutdown_tx,
            failure_rx: parking_lot::Mutex::new(Some(failure_rx)),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Takes the receiving end of the failure channel. Terminally failed
    /// tasks are delivered here exactly once; callable once.
    pub fn failure_stream(&self) -> Option<mpsc::UnboundedReceiver<FailedReplication>> {
        self.failure_rx.lock().take()
    }

    /// Accepts a task for asynchronous delivery.
    ///
    /// The version is recorded `PENDING` in the state store before the
    /// task is queued; a task is only ever acknowledged after that record
    /// is durable. Re-enqueueing a version that already reached a
    /// terminal state (a replay of finished work, typically after a
    /// restart) is an idempotent no-op. A full lane returns
    /// [`ReplicationError::QueueFull`] so the write path can apply
    /// backpressure instead of losing work.
    pub async fn enqueue(&self, task: ReplicationTask) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(ReplicationError::Shutdown);
        }

        if let Some(record) =
            self.shared.store.get(&task.object_key, &task.version_id).await?
        {
            if record.status.is_terminal() {
                debug!(
                    key = %task.object_key,
                    version = %task.version_id,
                    status = %record.status,
                    "version already resolved, ignoring replayed task"
                );
                counter!("replication_replayed_total").increment(1);
                return Ok(());
            }
        }

        self.shared
            .store
            .put(ReplicationRecord::pending(&task.object_key, &task.version_id))
            .await?;

        let senders = self
            .lanes
            .entry(task.destination_bucket.clone())
            .or_insert_with(|| self.spawn_lanes(&task.destination_bucket))
            .clone();
        let lane = lane_for_key(&task.object_key, senders.len());

        debug!(
            key = %task.object_key,
            version = %task.version_id,
            destination = %task.destination_bucket,
            lane = lane,
            "enqueueing replication task"
        );

        match senders[lane].try_send(task) {
            Ok(()) => {
                counter!("replication_enqueued_total").increment(1);
                gauge!("replication_queue_depth").increment(1.0);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                counter!("replication_throttled_total").increment(1);
                Err(ReplicationError::QueueFull { pending_items: self.shared.config.queue_size })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ReplicationError::Shutdown),
        }
    }

    /// Spawns the lane workers for one destination bucket.
    fn spawn_lanes(&self, destination: &str) -> Vec<mpsc::Sender<ReplicationTask>> {
        let count = self.shared.config.lanes_per_destination;
        let mut senders = Vec::with_capacity(count);
        let mut handles = self.workers.lock();
        for lane in 0..count {
            let (tx, rx) = mpsc::channel(self.shared.config.queue_size);
            senders.push(tx);
            let shared = Arc::clone(&self.shared);
            let destination = destination.to_string();
            handles.push(tokio::spawn(async move {
                Self::lane_worker(shared, destination, lane, rx).await;
            }));
        }
        info!(destination = %destination, lanes = count, "started replication lanes");
        senders
    }

    /// Drains one lane. Tasks are processed strictly one at a time, so
    /// the per-key FIFO guarantee falls out of the lane assignment.
    async fn lane_worker(
        shared: Arc<Shared>,
        destination: String,
        lane: usize,
        mut rx: mpsc::Receiver<ReplicationTask>,
    ) {
        while let Some(mut task) = rx.recv().await {
            gauge!("replication_queue_depth").decrement(1.0);
            if *shared.shutdown_rx.borrow() {
                // Acknowledged but unstarted; the PENDING record in the
                // state store is the durable marker for resumption.
                warn!(
                    key = %task.object_key,
                    version = %task.version_id,
                    "shutdown before replication started, task left PENDING"
                );
                counter!("replication_abandoned_total").increment(1);
                continue;
            }
            loop {
                match Self::process_once(&shared, &mut task).await {
                    TaskOutcome::RetryScheduled { after } => {
                        let mut shutdown = shared.shutdown_rx.clone();
                        tokio::select! {
                            () = sleep(after) => {}
                            _ = shutdown.changed() => {
                                warn!(
                                    key = %task.object_key,
                                    version = %task.version_id,
                                    "shutdown during retry backoff, task left PENDING"
                                );
                                break;
                            }
                        }
                    }
                    TaskOutcome::Completed | TaskOutcome::FailedTerminal => break,
                }
            }
        }
        debug!(destination = %destination, lane = lane, "replication lane stopped");
    }

    /// Runs a single copy attempt and classifies the result.
    ///
    /// Returns `Completed` when the replica is in place (including the
    /// already-replicated idempotent case), `RetryScheduled` with a
    /// jittered backoff for a transient failure with attempts remaining,
    /// and `FailedTerminal` once the version has been moved to FAILED.
    async fn process_once(shared: &Shared, task: &mut ReplicationTask) -> TaskOutcome {
        task.attempts += 1;
        task.last_attempt_at = Some(Utc::now());

        let started = Instant::now();
        let attempt = timeout(
            shared.config.attempt_timeout_duration(),
            Self::copy_replica(shared, task),
        )
        .await
        .unwrap_or(Err(ReplicationError::AttemptTimeout {
            timeout_ms: shared.config.attempt_timeout_ms,
        }));
        histogram!("replication_attempt_duration_ms")
            .record(started.elapsed().as_millis() as f64);

        match attempt {
            Ok(()) => {
                if let Err(err) = Self::finalize(shared, task, ReplicationStatus::Completed).await
                {
                    error!(
                        key = %task.object_key,
                        version = %task.version_id,
                        error = %err,
                        "failed to finalize completed replication"
                    );
                    return TaskOutcome::FailedTerminal;
                }
                debug!(
                    key = %task.object_key,
                    version = %task.version_id,
                    attempts = task.attempts,
                    "replication completed"
                );
                counter!("replication_completed_total").increment(1);
                TaskOutcome::Completed
            }
            Err(err) if err.is_retryable() && task.attempts < shared.config.max_attempts => {
                task.last_error = Some(err.to_string());
                let after = jittered(shared.config.backoff_for_attempt(task.attempts));
                warn!(
                    key = %task.object_key,
                    version = %task.version_id,
                    error = %err,
                    attempts = task.attempts,
                    max_attempts = shared.config.max_attempts,
                    backoff_ms = after.as_millis() as u64,
                    "replication attempt failed, retrying after backoff"
                );
                counter!("replication_retries_total").increment(1);
                Self::record_failed_attempt(shared, task, &err).await;
                TaskOutcome::RetryScheduled { after }
            }
            Err(err) => {
                task.last_error = Some(err.to_string());
                error!(
                    key = %task.object_key,
                    version = %task.version_id,
                    error = %err,
                    attempts = task.attempts,
                    "replication failed terminally"
                );
                Self::record_failed_attempt(shared, task, &err).await;
                if let Err(store_err) =
                    Self::finalize(shared, task, ReplicationStatus::Failed).await
                {
                    error!(
                        key = %task.object_key,
                        version = %task.version_id,
                        error = %store_err,
                        "failed to record terminal FAILED state"
                    );
                }
                counter!("replication_failed_total").increment(1);
                let _ = shared.failure_tx.send(FailedReplication {
                    task: task.clone(),
                    error: err.to_string(),
                });
                TaskOutcome::FailedTerminal
            }
        }
    }

    /// Performs the copy itself: idempotency guard, source read, replica
    /// write.
    async fn copy_replica(shared: &Shared, task: &ReplicationTask) -> Result<()> {
        // Ordering/idempotency guard: if the destination already holds
        // this sequence or a newer one, the copy happened (or a newer
        // version superseded it) and overwriting would reorder history.
        let current = shared
            .backend
            .replica_sequence(&task.destination_bucket, &task.object_key)
            .await?;
        if let Some(current) = current {
            if current >= task.sequence {
                debug!(
                    key = %task.object_key,
                    version = %task.version_id,
                    sequence = task.sequence,
                    destination_sequence = current,
                    "destination already at or past this version, skipping copy"
                );
                return Ok(());
            }
        }

        let source = shared
            .backend
            .read_object(&task.source_bucket, &task.object_key, &task.version_id)
            .await?;

        let storage_class =
            task.effective_storage_class(&shared.config.default_storage_class).to_string();
        let metadata = source.metadata.clone().as_replica();

        let written = shared
            .backend
            .write_object(
                &task.destination_bucket,
                &task.object_key,
                source.data,
                metadata,
                &storage_class,
            )
            .await?;

        debug!(
            key = %task.object_key,
            version = %task.version_id,
            replica_version = %written.version_id,
            storage_class = %storage_class,
            "replica written"
        );
        Ok(())
    }

    /// Records a failed attempt (PENDING -> PENDING) in the state store,
    /// waiting out a store outage rather than losing the bookkeeping.
    async fn record_failed_attempt(shared: &Shared, task: &ReplicationTask, err: &ReplicationError) {
        let message = err.to_string();
        let result = Self::retry_store(shared, || {
            shared.store.record_attempt(&task.object_key, &task.version_id, Some(&message))
        })
        .await;
        if let Err(store_err) = result {
            error!(
                key = %task.object_key,
                version = %task.version_id,
                error = %store_err,
                "could not record replication attempt"
            );
        }
    }

    /// CAS-finalizes a version to a terminal state, waiting out store
    /// outages. A conflict that finds the target state already recorded
    /// is treated as success: another pass of the same task got there
    /// first, which is exactly the idempotent-replay case.
    async fn finalize(
        shared: &Shared,
        task: &ReplicationTask,
        to: ReplicationStatus,
    ) -> Result<()> {
        let result = Self::retry_store(shared, || {
            shared.store.transition(
                &task.object_key,
                &task.version_id,
                ReplicationStatus::Pending,
                to,
            )
        })
        .await;
        match result {
            Err(ReplicationError::Conflict { actual, .. }) if actual == to => Ok(()),
            other => other,
        }
    }

    /// Runs a state-store operation, retrying with capped backoff while
    /// the store is unreachable. A PENDING version must never be dropped
    /// because the store had an outage; the task simply waits.
    async fn retry_store<F, Fut>(shared: &Shared, mut op: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let mut delay = STORE_RETRY_INITIAL;
        loop {
            match op().await {
                Err(ReplicationError::StoreUnavailable { reason }) => {
                    if *shared.shutdown_rx.borrow() {
                        return Err(ReplicationError::StoreUnavailable { reason });
                    }
                    warn!(error = %reason, retry_ms = delay.as_millis() as u64,
                        "state store unavailable, waiting");
                    sleep(delay).await;
                    delay = (delay * 2).min(STORE_RETRY_MAX);
                }
                other => return other,
            }
        }
    }

    /// Shuts the pipeline down, waiting up to the configured drain grace
    /// period for in-flight tasks.
    pub async fn shutdown(&self) {
        self.shutdown_with_grace(self.shared.config.drain_grace_duration()).await;
    }

    /// Shuts the pipeline down with an explicit grace period.
    ///
    /// New enqueues are rejected immediately; workers finish their
    /// in-flight task and drain-log the rest as abandoned (their PENDING
    /// records remain for resumption). Workers still running after the
    /// grace period are aborted.
    pub async fn shutdown_with_grace(&self, grace: Duration) {
        self.shut_down.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
        self.lanes.clear(); // drops all senders, closing the lanes

        let mut handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        let deadline = Instant::now() + grace;
        for handle in &mut handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if timeout(remaining, &mut *handle).await.is_err() {
                warn!("replication worker did not drain within grace period, aborting");
                handle.abort();
            }
        }
        info!("replication pipeline shut down");
    }
}

/// Picks the lane for a key. Same key, same lane, always.
fn lane_for_key(key: &str, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % lanes as u64) as usize
}

/// Adds up to 25% random jitter so synchronized retries spread out.
fn jittered(base: Duration) -> Duration {
    let max_extra = (base.as_millis() as u64) / 4;
    let extra = if max_extra == 0 { 0 } else { rand::thread_rng().gen_range(0..=max_extra) };
    base + Duration::from_millis(extra)
}
