use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::rows::{FtsHit, MessageRow};

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, role, content, created_at, updated_at, metadata";

/// Fields for inserting a message. `metadata` must carry `sequence`.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    pub created_at: Option<DateTime<Utc>>,
    pub metadata: Value,
}

pub struct MessageRepo<'a> {
    pub(crate) tx: &'a mut Transaction<'static, Postgres>,
}

impl MessageRepo<'_> {
    pub async fn create(&mut self, new: &NewMessage) -> Result<MessageRow> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            insert into messages (conversation_id, role, content, created_at, metadata)
            values ($1, $2, $3, coalesce($4, now()), $5)
            returning {MESSAGE_COLUMNS}
            "#,
        ))
        .bind(new.conversation_id)
        .bind(&new.role)
        .bind(&new.content)
        .bind(new.created_at)
        .bind(&new.metadata)
        .fetch_one(&mut **self.tx)
        .await?;
        Ok(row)
    }

    pub async fn get_by_id(&mut self, id: Uuid) -> Result<Option<MessageRow>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "select {MESSAGE_COLUMNS} from messages where id = $1",
        ))
        .bind(id)
        .fetch_optional(&mut **self.tx)
        .await?;
        Ok(row)
    }

    /// Messages of a conversation in canonical order: creation time, then
    /// the extractor-assigned sequence, then id. The sequence breaks ties
    /// when a whole import lands with identical timestamps.
    pub async fn get_by_conversation(&mut self, conversation_id: Uuid) -> Result<Vec<MessageRow>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            select {MESSAGE_COLUMNS} from messages
            where conversation_id = $1
            order by created_at, coalesce((metadata->>'sequence')::bigint, 0), id
            "#,
        ))
        .bind(conversation_id)
        .fetch_all(&mut **self.tx)
        .await?;
        Ok(rows)
    }

    /// Highest sequence in a conversation, or -1 when empty, so appends can
    /// start at `max + 1`.
    pub async fn max_sequence(&mut self, conversation_id: Uuid) -> Result<i64> {
        let max: Option<i64> = sqlx::query_scalar(
            "select max(coalesce((metadata->>'sequence')::bigint, 0)) from messages where conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_one(&mut **self.tx)
        .await?;
        Ok(max.unwrap_or(-1))
    }

    /// Full-text search over the generated tsvector column. The query goes
    /// through `websearch_to_tsquery` so expanded OR-terms work.
    pub async fn search_full_text(
        &mut self,
        query: &str,
        limit: i64,
        conversation_id: Option<Uuid>,
    ) -> Result<Vec<FtsHit>> {
        let rows = sqlx::query_as::<_, FtsHit>(
            r#"
            select m.id as message_id, m.conversation_id, m.role, m.content,
                   m.created_at, c.title as conversation_title,
                   ts_rank(m.search_vector, websearch_to_tsquery('english', $1))::float8 as rank
            from messages m
            join conversations c on c.id = m.conversation_id
            where m.search_vector @@ websearch_to_tsquery('english', $1)
              and ($3::uuid is null or m.conversation_id = $3)
            order by rank desc, m.created_at desc
            limit $2
            "#,
        )
        .bind(query)
        .bind(limit)
        .bind(conversation_id)
        .fetch_all(&mut **self.tx)
        .await?;
        Ok(rows)
    }

    /// Fuzzy fallback over the trigram index; catches typos FTS misses.
    pub async fn search_trigram(
        &mut self,
        query: &str,
        limit: i64,
        similarity_threshold: f32,
    ) -> Result<Vec<FtsHit>> {
        let rows = sqlx::query_as::<_, FtsHit>(
            r#"
            select m.id as message_id, m.conversation_id, m.role, m.content,
                   m.created_at, c.title as conversation_title,
                   similarity(m.content, $1)::float8 as rank
            from messages m
            join conversations c on c.id = m.conversation_id
            where similarity(m.content, $1) > $3
            order by rank desc, m.created_at desc
            limit $2
            "#,
        )
        .bind(query)
        .bind(limit)
        .bind(similarity_threshold)
        .fetch_all(&mut **self.tx)
        .await?;
        Ok(rows)
    }

    pub async fn without_embeddings(&mut self, limit: i64) -> Result<Vec<MessageRow>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            select {MESSAGE_COLUMNS} from messages m
            where not exists (select 1 from message_embeddings e where e.message_id = m.id)
            order by m.created_at
            limit $1
            "#,
        ))
        .bind(limit)
        .fetch_all(&mut **self.tx)
        .await?;
        Ok(rows)
    }

    /// Messages edited after their embedding was last written.
    pub async fn with_stale_embeddings(&mut self, limit: i64) -> Result<Vec<MessageRow>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            select {MESSAGE_COLUMNS} from messages m
            join message_embeddings e on e.message_id = m.id
            where m.updated_at > e.updated_at
            order by m.updated_at desc
            limit $1
            "#,
        ))
        .bind(limit)
        .fetch_all(&mut **self.tx)
        .await?;
        Ok(rows)
    }

    /// Merge keys into a message's metadata (jsonb shallow merge).
    pub async fn merge_metadata(&mut self, id: Uuid, patch: &Value) -> Result<bool> {
        let result = sqlx::query(
            "update messages set metadata = metadata || $2, updated_at = now() where id = $1",
        )
        .bind(id)
        .bind(patch)
        .execute(&mut **self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count(&mut self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("select count(*) from messages")
            .fetch_one(&mut **self.tx)
            .await?;
        Ok(count)
    }
}
