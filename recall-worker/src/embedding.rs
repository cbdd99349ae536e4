//! Embedding worker: drains `generate_embedding` jobs into message vectors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use pgvector::Vector;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use recall_embed::Embedder;
use recall_import::service::JOB_GENERATE_EMBEDDING;
use recall_store::{JobRow, UnitOfWork};

use crate::RunFlag;

#[derive(Debug, Clone)]
pub struct EmbeddingWorkerConfig {
    /// Jobs claimed per batch before sleeping.
    pub batch_size: usize,
    /// Idle sleep between polls.
    pub poll_interval: Duration,
    /// Attempt cap; at the cap a failing job becomes terminally failed.
    pub max_attempts: i32,
    /// Base retry delay; actual delay backs off exponentially.
    pub retry_minutes: i64,
}

impl Default for EmbeddingWorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            poll_interval: Duration::from_secs(2),
            max_attempts: 3,
            retry_minutes: 5,
        }
    }
}

#[derive(Default)]
struct WorkerStats {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

pub struct EmbeddingWorker {
    id: String,
    pool: PgPool,
    embedder: Arc<dyn Embedder>,
    config: EmbeddingWorkerConfig,
    running: RunFlag,
    stats: WorkerStats,
}

impl EmbeddingWorker {
    pub fn new(
        id: impl Into<String>,
        pool: PgPool,
        embedder: Arc<dyn Embedder>,
        config: EmbeddingWorkerConfig,
        running: RunFlag,
    ) -> Self {
        Self {
            id: id.into(),
            pool,
            embedder,
            config,
            running,
            stats: WorkerStats::default(),
        }
    }

    /// Worker loop: claim a batch, process each job in its own unit of
    /// work, sleep when the queue is empty. Exits when the run flag drops.
    pub async fn run(&self) {
        info!(
            worker = %self.id,
            batch_size = self.config.batch_size,
            "embedding worker started"
        );

        while self.running.is_running() {
            let processed = match self.process_batch().await {
                Ok(count) => count,
                Err(err) => {
                    error!(worker = %self.id, error = %err, "batch processing failed");
                    0
                }
            };
            if processed == 0 && self.running.is_running() {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        info!(
            worker = %self.id,
            processed = self.stats.processed.load(Ordering::Relaxed),
            succeeded = self.stats.succeeded.load(Ordering::Relaxed),
            failed = self.stats.failed.load(Ordering::Relaxed),
            "embedding worker stopped"
        );
    }

    /// Process up to `batch_size` jobs; returns how many were claimed.
    pub async fn process_batch(&self) -> Result<usize> {
        let mut processed = 0usize;
        let kinds = [JOB_GENERATE_EMBEDDING.to_owned()];

        for _ in 0..self.config.batch_size {
            if !self.running.is_running() {
                break;
            }

            // Claim in a short transaction so the `running` transition is
            // visible immediately and no row lock is held while embedding.
            let mut uow = UnitOfWork::begin(&self.pool).await?;
            let job = uow
                .jobs()
                .dequeue_next(Some(&kinds), self.config.max_attempts)
                .await?;
            uow.commit().await?;

            let Some(job) = job else {
                break;
            };

            processed += 1;
            self.stats.processed.fetch_add(1, Ordering::Relaxed);
            let succeeded = self.process_job(&job).await;
            if succeeded {
                self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
            } else {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        Ok(processed)
    }

    /// Process one claimed job. Returns whether it completed.
    async fn process_job(&self, job: &JobRow) -> bool {
        debug!(worker = %self.id, job = job.id, "processing embedding job");

        match self.try_process(job).await {
            Ok(JobOutcome::Completed) => {
                debug!(worker = %self.id, job = job.id, "embedding job completed");
                true
            }
            Ok(JobOutcome::InvalidPayload(reason)) => {
                // Broken payloads never heal; do not retry.
                error!(worker = %self.id, job = job.id, %reason, "invalid job payload");
                self.fail_permanently(job.id).await;
                false
            }
            Ok(JobOutcome::MessageMissing(message_id)) => {
                error!(worker = %self.id, job = job.id, %message_id, "message not found");
                self.fail_permanently(job.id).await;
                false
            }
            Err(err) => {
                warn!(worker = %self.id, job = job.id, error = %err, "embedding job failed; will retry");
                self.fail_with_retry(job.id).await;
                false
            }
        }
    }

    async fn try_process(&self, job: &JobRow) -> Result<JobOutcome> {
        let Some(message_id) = payload_message_id(&job.payload) else {
            return Ok(JobOutcome::InvalidPayload("missing message_id".to_owned()));
        };
        if job.payload.get("content").and_then(Value::as_str).is_none() {
            return Ok(JobOutcome::InvalidPayload("missing content".to_owned()));
        }

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let message = uow.messages().get_by_id(message_id).await?;
        uow.commit().await?;
        let Some(message) = message else {
            return Ok(JobOutcome::MessageMissing(message_id));
        };

        // Embed the stored content, not the payload snapshot, so edits made
        // after enqueue still produce a current vector.
        let vector = self.embedder.embed(&message.content).await?;

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        uow.embeddings()
            .create_or_update(message_id, Vector::from(vector), self.embedder.model())
            .await?;
        uow.jobs().mark_completed(job.id).await?;
        uow.commit().await?;
        Ok(JobOutcome::Completed)
    }

    async fn fail_permanently(&self, job_id: i64) {
        if let Err(err) = self.mark_failed(job_id, true).await {
            error!(job = job_id, error = %err, "failed to mark job failed");
        }
    }

    async fn fail_with_retry(&self, job_id: i64) {
        if let Err(err) = self.mark_failed(job_id, false).await {
            error!(job = job_id, error = %err, "failed to mark job for retry");
        }
    }

    async fn mark_failed(&self, job_id: i64, permanent: bool) -> Result<()> {
        let mut uow = UnitOfWork::begin(&self.pool).await?;
        if permanent {
            uow.jobs().mark_failed_permanently(job_id).await?;
        } else {
            uow.jobs()
                .mark_failed(job_id, self.config.retry_minutes, self.config.max_attempts)
                .await?;
        }
        uow.commit().await?;
        Ok(())
    }
}

enum JobOutcome {
    Completed,
    InvalidPayload(String),
    MessageMissing(Uuid),
}

fn payload_message_id(payload: &Value) -> Option<Uuid> {
    payload
        .get("message_id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

/// Pool of embedding workers sharing one run flag.
pub struct WorkerPool {
    running: RunFlag,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one).
    pub fn spawn(
        size: usize,
        pool: PgPool,
        embedder: Arc<dyn Embedder>,
        config: EmbeddingWorkerConfig,
        running: RunFlag,
    ) -> Self {
        let size = size.max(1);
        info!(workers = size, "starting embedding worker pool");

        let handles = (0..size)
            .map(|i| {
                let worker = EmbeddingWorker::new(
                    format!("worker-{}", i + 1),
                    pool.clone(),
                    embedder.clone(),
                    config.clone(),
                    running.clone(),
                );
                tokio::spawn(async move { worker.run().await })
            })
            .collect();

        Self { running, handles }
    }

    /// Flip the run flag and wait up to `grace` per worker; stragglers are
    /// abandoned (the stuck-job sweep reclaims their rows).
    pub async fn shutdown(self, grace: Duration) {
        self.running.stop();
        for handle in self.handles {
            if tokio::time::timeout(grace, handle).await.is_err() {
                warn!("worker did not stop in time; abandoning");
            }
        }
        info!("embedding worker pool stopped");
    }

    /// Wait for all workers to finish naturally (after `running.stop()`).
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Queue maintenance: reclaim stuck rows and prune old completed rows.
pub async fn run_queue_maintenance(pool: &PgPool, stuck_hours: i64, keep_days: i64) -> Result<(u64, u64)> {
    let mut uow = UnitOfWork::begin(pool).await?;
    let reclaimed = uow.jobs().cleanup_stuck(stuck_hours).await?;
    let pruned = uow.jobs().cleanup_completed(keep_days).await?;
    uow.commit().await?;
    if reclaimed > 0 || pruned > 0 {
        info!(reclaimed, pruned, "queue maintenance complete");
    }
    Ok((reclaimed, pruned))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_message_id_requires_valid_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(
            payload_message_id(&json!({ "message_id": id.to_string() })),
            Some(id)
        );
        assert_eq!(payload_message_id(&json!({ "message_id": "nope" })), None);
        assert_eq!(payload_message_id(&json!({})), None);
        assert_eq!(payload_message_id(&json!({ "message_id": 42 })), None);
    }

    #[test]
    fn default_config_matches_worker_contract() {
        let config = EmbeddingWorkerConfig::default();
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
    }
}
