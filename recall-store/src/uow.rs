use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, Transaction};

use crate::conversations::ConversationRepo;
use crate::embeddings::EmbeddingRepo;
use crate::jobs::JobRepo;
use crate::messages::MessageRepo;
use crate::settings::SettingRepo;

/// Transactional unit of work.
///
/// Owns one `sqlx` transaction; repositories are short-lived views borrowing
/// it. `commit()` consumes the value, so a scope gets exactly one commit;
/// dropping without committing rolls the transaction back.
///
/// ```ignore
/// let mut uow = UnitOfWork::begin(&pool).await?;
/// let conv = uow.conversations().create(&new_conv).await?;
/// uow.jobs().enqueue("generate_embedding", &payload, None).await?;
/// uow.commit().await?;
/// ```
pub struct UnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl UnitOfWork {
    pub async fn begin(pool: &PgPool) -> Result<Self> {
        let tx = pool.begin().await.context("failed to begin transaction")?;
        Ok(Self { tx })
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.context("failed to commit transaction")
    }

    /// Explicit rollback; equivalent to dropping the unit of work.
    pub async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .context("failed to roll back transaction")
    }

    pub fn conversations(&mut self) -> ConversationRepo<'_> {
        ConversationRepo { tx: &mut self.tx }
    }

    pub fn messages(&mut self) -> MessageRepo<'_> {
        MessageRepo { tx: &mut self.tx }
    }

    pub fn embeddings(&mut self) -> EmbeddingRepo<'_> {
        EmbeddingRepo { tx: &mut self.tx }
    }

    pub fn jobs(&mut self) -> JobRepo<'_> {
        JobRepo { tx: &mut self.tx }
    }

    pub fn settings(&mut self) -> SettingRepo<'_> {
        SettingRepo { tx: &mut self.tx }
    }
}
