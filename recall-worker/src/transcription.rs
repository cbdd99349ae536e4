//! Transcription worker: resolves `youtube_transcription` jobs by fetching
//! transcripts and merging them into message metadata.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use recall_embed::TranscriptOracle;
use recall_import::service::JOB_YOUTUBE_TRANSCRIPTION;
use recall_store::{JobRow, UnitOfWork};

use crate::embedding::EmbeddingWorkerConfig;
use crate::RunFlag;

pub struct TranscriptionWorker {
    id: String,
    pool: PgPool,
    oracle: Arc<dyn TranscriptOracle>,
    /// Preferred transcript languages, in order.
    languages: Vec<String>,
    config: EmbeddingWorkerConfig,
    running: RunFlag,
}

impl TranscriptionWorker {
    pub fn new(
        id: impl Into<String>,
        pool: PgPool,
        oracle: Arc<dyn TranscriptOracle>,
        config: EmbeddingWorkerConfig,
        running: RunFlag,
    ) -> Self {
        Self {
            id: id.into(),
            pool,
            oracle,
            languages: vec!["en".to_owned()],
            config,
            running,
        }
    }

    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = languages;
        self
    }

    pub async fn run(&self) {
        info!(worker = %self.id, "transcription worker started");

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

        info!(worker = %self.id, "transcription worker stopped");
    }

    pub async fn process_batch(&self) -> Result<usize> {
        let mut processed = 0usize;
        let kinds = [JOB_YOUTUBE_TRANSCRIPTION.to_owned()];

        for _ in 0..self.config.batch_size {
            if !self.running.is_running() {
                break;
            }

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
            self.process_job(&job).await;
        }

        Ok(processed)
    }

    async fn process_job(&self, job: &JobRow) {
        debug!(worker = %self.id, job = job.id, "processing transcription job");

        let message_id = job
            .payload
            .get("message_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok());
        let video_id = job
            .payload
            .get("video_id")
            .and_then(Value::as_str)
            .map(str::to_owned);

        let (Some(message_id), Some(video_id)) = (message_id, video_id) else {
            error!(worker = %self.id, job = job.id, "invalid transcription payload");
            self.fail(job.id, true).await;
            return;
        };

        match self.try_process(job.id, message_id, &video_id).await {
            Ok(true) => debug!(worker = %self.id, job = job.id, "transcription job completed"),
            Ok(false) => {
                error!(worker = %self.id, job = job.id, %message_id, "message not found");
                self.fail(job.id, true).await;
            }
            Err(err) => {
                warn!(worker = %self.id, job = job.id, error = %err, "transcript fetch failed; will retry");
                self.fail(job.id, false).await;
            }
        }
    }

    async fn try_process(&self, job_id: i64, message_id: Uuid, video_id: &str) -> Result<bool> {
        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let message = uow.messages().get_by_id(message_id).await?;
        uow.commit().await?;
        if message.is_none() {
            return Ok(false);
        }

        let transcript = self.oracle.fetch_transcript(video_id, &self.languages).await?;

        let patch = json!({
            "transcript": transcript.text,
            "transcript_language": transcript.language,
            "transcript_is_generated": transcript.is_generated,
            "transcript_duration": transcript.duration,
        });

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        uow.messages().merge_metadata(message_id, &patch).await?;
        uow.jobs().mark_completed(job_id).await?;
        uow.commit().await?;
        Ok(true)
    }

    async fn fail(&self, job_id: i64, permanent: bool) {
        let result: Result<()> = async {
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
        .await;
        if let Err(err) = result {
            error!(job = job_id, error = %err, "failed to record job failure");
        }
    }
}
