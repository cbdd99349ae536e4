use anyhow::Result;
use pgvector::Vector;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::rows::{EmbeddingRow, VectorHit};

pub struct EmbeddingRepo<'a> {
    pub(crate) tx: &'a mut Transaction<'static, Postgres>,
}

impl EmbeddingRepo<'_> {
    /// Idempotent upsert keyed by `message_id`.
    pub async fn create_or_update(
        &mut self,
        message_id: Uuid,
        embedding: Vector,
        model: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            insert into message_embeddings (message_id, embedding, model, updated_at)
            values ($1, $2, $3, now())
            on conflict (message_id)
            do update set embedding = excluded.embedding,
                          model = excluded.model,
                          updated_at = now()
            "#,
        )
        .bind(message_id)
        .bind(embedding)
        .bind(model)
        .execute(&mut **self.tx)
        .await?;
        Ok(())
    }

    pub async fn get_by_message_id(&mut self, message_id: Uuid) -> Result<Option<EmbeddingRow>> {
        let row = sqlx::query_as::<_, EmbeddingRow>(
            "select message_id, embedding, model, updated_at from message_embeddings where message_id = $1",
        )
        .bind(message_id)
        .fetch_optional(&mut **self.tx)
        .await?;
        Ok(row)
    }

    pub async fn delete_by_message_id(&mut self, message_id: Uuid) -> Result<bool> {
        let result = sqlx::query("delete from message_embeddings where message_id = $1")
            .bind(message_id)
            .execute(&mut **self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Cosine similarity search. `distance_threshold` filters out anything
    /// farther than `1 - minimum similarity`; lower distance sorts first.
    pub async fn search_similar(
        &mut self,
        query_embedding: &Vector,
        limit: i64,
        distance_threshold: f64,
        conversation_id: Option<Uuid>,
    ) -> Result<Vec<VectorHit>> {
        let rows = sqlx::query_as::<_, VectorHit>(
            r#"
            select m.id as message_id, m.conversation_id, m.role, m.content,
                   m.created_at, c.title as conversation_title,
                   (e.embedding <=> $1)::float8 as distance,
                   (1 - (e.embedding <=> $1))::float8 as similarity
            from message_embeddings e
            join messages m on m.id = e.message_id
            join conversations c on c.id = m.conversation_id
            where (e.embedding <=> $1) < $3
              and ($4::uuid is null or m.conversation_id = $4)
            order by e.embedding <=> $1
            limit $2
            "#,
        )
        .bind(query_embedding)
        .bind(limit)
        .bind(distance_threshold)
        .bind(conversation_id)
        .fetch_all(&mut **self.tx)
        .await?;
        Ok(rows)
    }

    /// (total messages, embedded messages, stale embeddings).
    pub async fn coverage(&mut self) -> Result<(i64, i64, i64)> {
        let row: (i64, i64, i64) = sqlx::query_as(
            r#"
            select
                (select count(*) from messages),
                (select count(*) from message_embeddings),
                (select count(*) from messages m
                 join message_embeddings e on e.message_id = m.id
                 where m.updated_at > e.updated_at)
            "#,
        )
        .fetch_one(&mut **self.tx)
        .await?;
        Ok(row)
    }
}
