//! recall-store - Postgres + pgvector persistence for the archive
//!
//! Everything that touches the database lives here: pool bootstrap with
//! embedded migrations, the transactional unit of work, and the repository
//! views (conversations, messages, embeddings, jobs, settings) that the
//! import/search/worker crates drive.

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::debug;

pub mod conversations;
pub mod embeddings;
pub mod jobs;
pub mod messages;
pub mod rows;
pub mod settings;
pub mod uow;

pub use conversations::NewConversation;
pub use messages::NewMessage;
pub use rows::{
    ConversationRow, ConversationSummaryRow, EmbeddingRow, FtsHit, JobRow, MessageRow,
    SettingRow, VectorHit,
};
pub use uow::UnitOfWork;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../migrations");

/// Open a connection pool, ensure required extensions, and run migrations.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to postgres")?;
    ensure_extensions(&pool).await?;
    MIGRATOR.run(&pool).await.context("migrations failed")?;
    debug!("database ready");
    Ok(pool)
}

/// Create the `vector` and `pg_trgm` extensions if missing.
///
/// Kept outside the migration files so `sqlx::test` databases (which run
/// migrations for us) can call this first, same as production connect.
pub async fn ensure_extensions(pool: &PgPool) -> Result<()> {
    sqlx::query("create extension if not exists vector")
        .execute(pool)
        .await?;
    sqlx::query("create extension if not exists pg_trgm")
        .execute(pool)
        .await?;
    Ok(())
}
