use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::rows::{ConversationRow, ConversationSummaryRow};

/// Fields for inserting a conversation. Timestamps default to `now()` when
/// the source did not provide usable values.
#[derive(Debug, Clone, Default)]
pub struct NewConversation {
    pub title: String,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub source_updated_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub struct ConversationRepo<'a> {
    pub(crate) tx: &'a mut Transaction<'static, Postgres>,
}

impl ConversationRepo<'_> {
    pub async fn create(&mut self, new: &NewConversation) -> Result<ConversationRow> {
        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            insert into conversations (title, source_type, source_id, source_updated_at, created_at, updated_at)
            values ($1, coalesce($2, 'unknown'), $3, $4, coalesce($5, now()), coalesce($6, now()))
            returning id, title, source_type, source_id, source_updated_at, created_at, updated_at, is_saved
            "#,
        )
        .bind(&new.title)
        .bind(&new.source_type)
        .bind(&new.source_id)
        .bind(new.source_updated_at)
        .bind(new.created_at)
        .bind(new.updated_at)
        .fetch_one(&mut **self.tx)
        .await?;
        Ok(row)
    }

    pub async fn get_by_id(&mut self, id: Uuid) -> Result<Option<ConversationRow>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            "select id, title, source_type, source_id, source_updated_at, created_at, updated_at, is_saved \
             from conversations where id = $1",
        )
        .bind(id)
        .fetch_optional(&mut **self.tx)
        .await?;
        Ok(row)
    }

    pub async fn get_all(&mut self) -> Result<Vec<ConversationRow>> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            "select id, title, source_type, source_id, source_updated_at, created_at, updated_at, is_saved \
             from conversations order by updated_at desc",
        )
        .fetch_all(&mut **self.tx)
        .await?;
        Ok(rows)
    }

    /// All conversations of one source format; the import service scans
    /// these to build its duplicate-detection map.
    pub async fn get_by_source_type(&mut self, source_type: &str) -> Result<Vec<ConversationRow>> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            "select id, title, source_type, source_id, source_updated_at, created_at, updated_at, is_saved \
             from conversations where source_type = $1 order by created_at",
        )
        .bind(source_type)
        .fetch_all(&mut **self.tx)
        .await?;
        Ok(rows)
    }

    /// Record the source's updated_at after an incremental update.
    pub async fn update_source_tracking(
        &mut self,
        id: Uuid,
        source_updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "update conversations set source_updated_at = $2, updated_at = now() where id = $1",
        )
        .bind(id)
        .bind(source_updated_at)
        .execute(&mut **self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_saved(&mut self, id: Uuid, is_saved: bool) -> Result<bool> {
        let result = sqlx::query("update conversations set is_saved = $2, updated_at = now() where id = $1")
            .bind(id)
            .bind(is_saved)
            .execute(&mut **self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a conversation; messages and embeddings cascade.
    pub async fn delete(&mut self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("delete from conversations where id = $1")
            .bind(id)
            .execute(&mut **self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn search_by_title(&mut self, query: &str, limit: i64) -> Result<Vec<ConversationRow>> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            "select id, title, source_type, source_id, source_updated_at, created_at, updated_at, is_saved \
             from conversations where title ilike $1 order by updated_at desc limit $2",
        )
        .bind(format!("%{query}%"))
        .bind(limit)
        .fetch_all(&mut **self.tx)
        .await?;
        Ok(rows)
    }

    /// List conversations with rollup info, most recently active first.
    pub async fn list_summaries(
        &mut self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ConversationSummaryRow>> {
        let rows = sqlx::query_as::<_, ConversationSummaryRow>(
            r#"
            select c.id, c.title, c.created_at, c.updated_at,
                   coalesce(cs.message_count, 0) as message_count,
                   cs.earliest_message_at, cs.latest_message_at, cs.preview
            from conversations c
            left join conversation_summaries cs on cs.id = c.id
            order by coalesce(cs.latest_message_at, c.updated_at) desc
            limit $1 offset $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut **self.tx)
        .await?;
        Ok(rows)
    }

    pub async fn count(&mut self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("select count(*) from conversations")
            .fetch_one(&mut **self.tx)
            .await?;
        Ok(count)
    }
}
