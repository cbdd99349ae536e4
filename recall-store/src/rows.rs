use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConversationRow {
    pub id: Uuid,
    pub title: String,
    pub source_type: String,
    pub source_id: Option<String>,
    pub source_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_saved: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Value,
}

impl MessageRow {
    /// Extractor-assigned order index carried in metadata. Messages written
    /// before sequences existed read as 0.
    pub fn sequence(&self) -> i64 {
        self.metadata
            .get("sequence")
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmbeddingRow {
    pub message_id: Uuid,
    pub embedding: Vector,
    pub model: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRow {
    pub id: i64,
    pub kind: String,
    pub payload: Value,
    pub status: String,
    pub attempts: i32,
    pub not_before: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SettingRow {
    pub id: String,
    pub value: String,
    pub category: String,
    pub updated_at: DateTime<Utc>,
}

/// Per-conversation rollup from the `conversation_summaries` view.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConversationSummaryRow {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: i64,
    pub earliest_message_at: Option<DateTime<Utc>>,
    pub latest_message_at: Option<DateTime<Utc>>,
    pub preview: Option<String>,
}

/// A full-text search hit with its ts_rank score.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FtsHit {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub conversation_title: String,
    pub rank: f64,
}

/// A vector similarity hit; `similarity = 1 - cosine distance`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VectorHit {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub conversation_title: String,
    pub distance: f64,
    pub similarity: f64,
}
