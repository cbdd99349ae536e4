//! Conversation import service.
//!
//! Detects the export format, deduplicates by content hash, updates
//! existing conversations incrementally by source timestamp, and enqueues
//! one embedding job per persisted message inside the same transaction
//! (outbox pattern: the message and its job either both land or neither
//! does).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use recall_core::{
    conversation_content_hash, message_fingerprint, normalize_timestamp, ExtractedMessage,
};
use recall_embed::DEFAULT_MODEL;
use recall_store::{NewConversation, NewMessage, UnitOfWork};

use crate::error::ImportError;
use crate::format::{detect_format, registered_formats, youtube, Format};
use crate::license::CapabilityOracle;
use crate::result::ImportResult;

pub const JOB_GENERATE_EMBEDDING: &str = "generate_embedding";
pub const JOB_YOUTUBE_TRANSCRIPTION: &str = "youtube_transcription";

/// The whole watch history lives in one synthetic conversation.
const YOUTUBE_HISTORY_SOURCE_ID: &str = "youtube_watch_history";

struct ExistingConversation {
    content_hash: String,
    conversation_id: Uuid,
    source_updated_at: Option<DateTime<Utc>>,
}

pub struct ImportService {
    pool: PgPool,
    capabilities: Arc<dyn CapabilityOracle>,
}

impl ImportService {
    pub fn new(pool: PgPool, capabilities: Arc<dyn CapabilityOracle>) -> Self {
        Self { pool, capabilities }
    }

    /// Import conversations from a parsed export payload.
    ///
    /// Per-conversation failures are collected into the result; only
    /// payload-level problems (unknown format, missing license) fail the
    /// call.
    pub async fn import_json(&self, data: &Value) -> Result<ImportResult, ImportError> {
        let mut result = ImportResult::new();

        let Some((conversations, format)) = detect_format(data) else {
            return Err(ImportError::FormatDetection {
                available: registered_formats(),
            });
        };
        if conversations.is_empty() {
            return Err(ImportError::FormatDetection {
                available: registered_formats(),
            });
        }
        result.format_detected = format.key().to_owned();

        if let Some(feature) = format.license_feature() {
            if !self.capabilities.has_feature(feature) {
                return Err(ImportError::LicenseRequired {
                    format: format.display_name().to_owned(),
                });
            }
        }

        info!(
            format = format.key(),
            conversations = conversations.len(),
            "detected export format"
        );
        result.note(format!(
            "Detected {} format with {} conversations",
            format.display_name(),
            conversations.len()
        ));

        let existing = self.build_existing_map(format).await?;
        result.note(format!(
            "Found {} existing conversations for duplicate checking",
            existing.len()
        ));

        if format == Format::YouTube {
            if let Err(err) = self
                .import_youtube_history(&conversations, &existing, &mut result)
                .await
            {
                warn!(error = %err, "youtube watch history import failed");
                result.errors.push(err.to_string());
                result.failed_count += 1;
            }
        } else {
            for conv_data in &conversations {
                if let Err(err) = self
                    .import_single(conv_data, format, &existing, &mut result)
                    .await
                {
                    let title = conversation_title(conv_data);
                    warn!(error = %err, %title, "conversation import failed");
                    result
                        .errors
                        .push(format!("Failed to import conversation '{title}': {err}"));
                    result.failed_count += 1;
                }
            }
        }

        result.note(result.to_string());
        info!(summary = %result, "import complete");
        Ok(result)
    }

    /// Map `source_id -> (content hash, row id, source_updated_at)` over all
    /// prior conversations of this format.
    async fn build_existing_map(
        &self,
        format: Format,
    ) -> Result<HashMap<String, ExistingConversation>, ImportError> {
        let mut map = HashMap::new();
        let mut uow = UnitOfWork::begin(&self.pool).await?;

        let conversations = uow.conversations().get_by_source_type(format.key()).await?;
        for conv in conversations {
            let Some(source_id) = conv.source_id.clone() else {
                continue;
            };
            let messages = uow.messages().get_by_conversation(conv.id).await?;
            let content_hash =
                conversation_content_hash(messages.iter().map(|m| m.content.as_str()));
            map.insert(
                source_id,
                ExistingConversation {
                    content_hash,
                    conversation_id: conv.id,
                    source_updated_at: conv.source_updated_at,
                },
            );
        }

        uow.commit().await?;
        Ok(map)
    }

    async fn import_single(
        &self,
        conv_data: &Value,
        format: Format,
        existing: &HashMap<String, ExistingConversation>,
        result: &mut ImportResult,
    ) -> Result<(), ImportError> {
        let title = conversation_title(conv_data);
        let messages = format.extract(conv_data)?;
        if messages.is_empty() {
            return Ok(());
        }

        let source_id = conv_data
            .get("id")
            .or_else(|| conv_data.get("uuid"))
            .and_then(Value::as_str)
            .map(str::to_owned);

        let content_hash = conversation_content_hash(messages.iter().map(|m| m.content.as_str()));

        if let Some(known) = source_id.as_deref().and_then(|id| existing.get(id)) {
            if content_hash == known.content_hash {
                result.skipped_duplicates += 1;
                info!(%title, "skipping duplicate conversation");
                return Ok(());
            }

            let source_updated_at = extract_source_updated_at(conv_data, format);
            if should_update(known.source_updated_at, source_updated_at) {
                let added = self
                    .append_new_messages(
                        known.conversation_id,
                        format,
                        &messages,
                        source_updated_at,
                        false,
                    )
                    .await?;
                result.updated_count += 1;
                result.messages_added += added;
                info!(%title, added, "updated conversation");
            } else {
                result.skipped_duplicates += 1;
                info!(%title, "content differs but source is not newer; skipping");
            }
            return Ok(());
        }

        // New conversation: message timestamps first, conversation-level
        // fields as fallback.
        let (conv_created, conv_updated) = conversation_level_timestamps(conv_data, format);
        let earliest = messages
            .iter()
            .filter_map(|m| m.created_at)
            .min()
            .or(conv_created);
        let latest = messages
            .iter()
            .filter_map(|m| m.created_at)
            .max()
            .or(conv_updated)
            .or(earliest);

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let conversation = uow
            .conversations()
            .create(&NewConversation {
                title: title.clone(),
                source_type: Some(format.key().to_owned()),
                source_id: source_id.clone(),
                source_updated_at: source_id
                    .as_ref()
                    .and_then(|_| extract_source_updated_at(conv_data, format)),
                created_at: earliest,
                updated_at: latest,
            })
            .await?;

        for message in &messages {
            if message.is_empty() {
                continue;
            }
            let metadata = build_message_metadata(
                message,
                format,
                &title,
                source_id.as_deref(),
                conversation.id,
                message.sequence,
            );
            let row = uow
                .messages()
                .create(&NewMessage {
                    conversation_id: conversation.id,
                    role: message.role.as_str().to_owned(),
                    content: message.content.clone(),
                    created_at: message.created_at.or(earliest),
                    metadata,
                })
                .await?;

            uow.jobs()
                .enqueue(
                    JOB_GENERATE_EMBEDDING,
                    &embedding_payload(row.id, conversation.id, &message.content),
                    None,
                )
                .await?;
        }

        uow.commit().await?;
        result.imported_count += 1;
        if result.imported_count % 50 == 0 {
            info!(count = result.imported_count, "imported conversations...");
        }
        Ok(())
    }

    /// Append messages not already present (by role+content fingerprint) to
    /// an existing conversation, assigning sequences after the current max
    /// and enqueuing exactly one embedding job per appended message.
    async fn append_new_messages(
        &self,
        conversation_id: Uuid,
        format: Format,
        messages: &[ExtractedMessage],
        source_updated_at: Option<DateTime<Utc>>,
        enqueue_transcriptions: bool,
    ) -> Result<usize, ImportError> {
        let mut uow = UnitOfWork::begin(&self.pool).await?;

        let existing_messages = uow.messages().get_by_conversation(conversation_id).await?;
        let mut fingerprints: std::collections::HashSet<String> = existing_messages
            .iter()
            .map(|m| message_fingerprint(&m.role, m.content.trim()))
            .collect();
        let mut next_sequence = uow.messages().max_sequence(conversation_id).await? + 1;

        let mut added = 0usize;
        for message in messages {
            let content = message.content.trim();
            if content.is_empty() {
                continue;
            }
            let fingerprint = message_fingerprint(message.role.as_str(), content);
            if !fingerprints.insert(fingerprint) {
                continue;
            }

            let mut metadata = json!({
                "source": format.key(),
                "sequence": next_sequence,
            });
            if let Some(extra) = &message.metadata {
                merge_objects(&mut metadata, extra);
            }

            let row = uow
                .messages()
                .create(&NewMessage {
                    conversation_id,
                    role: message.role.as_str().to_owned(),
                    content: content.to_owned(),
                    created_at: message.created_at,
                    metadata,
                })
                .await?;

            uow.jobs()
                .enqueue(
                    JOB_GENERATE_EMBEDDING,
                    &embedding_payload(row.id, conversation_id, content),
                    None,
                )
                .await?;

            if enqueue_transcriptions {
                if let Some(payload) = transcription_payload(row.id, message) {
                    uow.jobs()
                        .enqueue(JOB_YOUTUBE_TRANSCRIPTION, &payload, None)
                        .await?;
                }
            }

            next_sequence += 1;
            added += 1;
        }

        if let Some(ts) = source_updated_at {
            uow.conversations()
                .update_source_tracking(conversation_id, ts)
                .await?;
        }

        uow.commit().await?;
        Ok(added)
    }

    /// Import a YouTube watch history as one synthetic conversation; each
    /// event is a message and, when a video id is known, also a
    /// transcription job.
    async fn import_youtube_history(
        &self,
        events: &[Value],
        existing: &HashMap<String, ExistingConversation>,
        result: &mut ImportResult,
    ) -> Result<(), ImportError> {
        let messages = youtube::extract_watch_history(events)?;
        if messages.is_empty() {
            warn!("no valid watch events found");
            return Ok(());
        }

        let timestamps: Vec<DateTime<Utc>> = messages.iter().filter_map(|m| m.created_at).collect();
        let earliest = timestamps.iter().min().copied();
        let latest = timestamps.iter().max().copied();
        let title = match (earliest, latest) {
            (Some(first), Some(last)) => format!(
                "YouTube Watch History ({} to {})",
                first.format("%Y-%m-%d"),
                last.format("%Y-%m-%d")
            ),
            _ => "YouTube Watch History".to_owned(),
        };

        if let Some(known) = existing.get(YOUTUBE_HISTORY_SOURCE_ID) {
            let content_hash =
                conversation_content_hash(messages.iter().map(|m| m.content.as_str()));
            if content_hash == known.content_hash {
                result.skipped_duplicates += 1;
                info!("skipping duplicate watch history");
                return Ok(());
            }
            let added = self
                .append_new_messages(known.conversation_id, Format::YouTube, &messages, latest, true)
                .await?;
            if added > 0 {
                result.updated_count += 1;
                result.messages_added += added;
                result.note(format!("Appended {added} watch events"));
            } else {
                result.skipped_duplicates += 1;
            }
            return Ok(());
        }

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let conversation = uow
            .conversations()
            .create(&NewConversation {
                title,
                source_type: Some(Format::YouTube.key().to_owned()),
                source_id: Some(YOUTUBE_HISTORY_SOURCE_ID.to_owned()),
                source_updated_at: latest,
                created_at: earliest,
                updated_at: latest,
            })
            .await?;

        for message in &messages {
            if message.is_empty() {
                continue;
            }
            let mut metadata = json!({
                "source": Format::YouTube.key(),
                "sequence": message.sequence,
            });
            if let Some(extra) = &message.metadata {
                merge_objects(&mut metadata, extra);
            }

            let row = uow
                .messages()
                .create(&NewMessage {
                    conversation_id: conversation.id,
                    role: message.role.as_str().to_owned(),
                    content: message.content.clone(),
                    created_at: message.created_at,
                    metadata,
                })
                .await?;

            uow.jobs()
                .enqueue(
                    JOB_GENERATE_EMBEDDING,
                    &embedding_payload(row.id, conversation.id, &message.content),
                    None,
                )
                .await?;

            if let Some(payload) = transcription_payload(row.id, message) {
                uow.jobs()
                    .enqueue(JOB_YOUTUBE_TRANSCRIPTION, &payload, None)
                    .await?;
            }
        }

        uow.commit().await?;
        result.imported_count += 1;
        result.note(format!(
            "Imported YouTube watch history with {} videos",
            messages.len()
        ));
        Ok(())
    }
}

fn conversation_title(conv_data: &Value) -> String {
    conv_data
        .get("title")
        .or_else(|| conv_data.get("name"))
        .and_then(Value::as_str)
        .filter(|t| !t.trim().is_empty())
        .unwrap_or("Untitled Conversation")
        .to_owned()
}

/// Source-reported update timestamp, per format field names.
fn extract_source_updated_at(conv_data: &Value, format: Format) -> Option<DateTime<Utc>> {
    let (updated_key, created_key) = match format {
        Format::ChatGpt => ("update_time", "create_time"),
        Format::Claude | Format::OpenWebUi => ("updated_at", "created_at"),
        Format::YouTube => return None,
    };
    conv_data
        .get(updated_key)
        .and_then(normalize_timestamp)
        .or_else(|| conv_data.get(created_key).and_then(normalize_timestamp))
}

fn conversation_level_timestamps(
    conv_data: &Value,
    format: Format,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let (created_key, updated_key) = match format {
        Format::ChatGpt => ("create_time", "update_time"),
        Format::Claude | Format::OpenWebUi => ("created_at", "updated_at"),
        Format::YouTube => return (None, None),
    };
    let created = conv_data.get(created_key).and_then(normalize_timestamp);
    let updated = conv_data
        .get(updated_key)
        .and_then(normalize_timestamp)
        .or(created);
    (created, updated)
}

/// Decide whether an incremental update should run: only when the source
/// reports a timestamp and it is strictly newer than what we stored.
fn should_update(
    existing_updated_at: Option<DateTime<Utc>>,
    new_updated_at: Option<DateTime<Utc>>,
) -> bool {
    match (existing_updated_at, new_updated_at) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(existing), Some(new)) => new > existing,
    }
}

fn build_message_metadata(
    message: &ExtractedMessage,
    format: Format,
    title: &str,
    source_id: Option<&str>,
    conversation_id: Uuid,
    sequence: i64,
) -> Value {
    let mut metadata = json!({
        "source": format.key(),
        "conversation_title": title,
        "original_conversation_id": source_id
            .map(str::to_owned)
            .unwrap_or_else(|| conversation_id.to_string()),
        "sequence": sequence,
    });
    if !message.attachments.is_empty() {
        metadata["attachments"] = serde_json::to_value(&message.attachments).unwrap_or(Value::Null);
    }
    if let Some(extra) = &message.metadata {
        merge_objects(&mut metadata, extra);
    }
    metadata
}

fn merge_objects(target: &mut Value, extra: &Value) {
    if let (Some(target_map), Some(extra_map)) = (target.as_object_mut(), extra.as_object()) {
        for (key, value) in extra_map {
            target_map.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}

fn embedding_payload(message_id: Uuid, conversation_id: Uuid, content: &str) -> Value {
    json!({
        "message_id": message_id,
        "conversation_id": conversation_id,
        "content": content,
        "model": DEFAULT_MODEL,
    })
}

fn transcription_payload(message_id: Uuid, message: &ExtractedMessage) -> Option<Value> {
    let metadata = message.metadata.as_ref()?;
    let video_id = metadata.get("video_id").and_then(Value::as_str)?;
    Some(json!({
        "message_id": message_id,
        "video_id": video_id,
        "video_url": metadata.get("video_url").and_then(Value::as_str).unwrap_or(""),
    }))
}
