//! Store invariants: ordering, cascades, embedding idempotence, summaries.

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use pgvector::Vector;
use serde_json::json;
use sqlx::PgPool;

use recall_store::{NewConversation, NewMessage, UnitOfWork, MIGRATOR};

async fn seed_conversation(pool: &PgPool, title: &str) -> Result<uuid::Uuid> {
    let mut uow = UnitOfWork::begin(pool).await?;
    let conv = uow
        .conversations()
        .create(&NewConversation {
            title: title.to_owned(),
            source_type: Some("claude".to_owned()),
            source_id: Some(format!("src-{title}")),
            ..Default::default()
        })
        .await?;
    uow.commit().await?;
    Ok(conv.id)
}

#[sqlx::test(migrator = "MIGRATOR")]
#[ignore = "requires pgvector docker image (see README)"]
async fn messages_order_by_created_at_sequence_id(pool: PgPool) -> Result<()> {
    let conv_id = seed_conversation(&pool, "ordering").await?;
    let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

    let mut uow = UnitOfWork::begin(&pool).await?;
    // Insert out of order: same timestamp, sequences 2, 0, 1.
    for (content, sequence) in [("third", 2i64), ("first", 0), ("second", 1)] {
        uow.messages()
            .create(&NewMessage {
                conversation_id: conv_id,
                role: "user".to_owned(),
                content: content.to_owned(),
                created_at: Some(t0),
                metadata: json!({ "sequence": sequence }),
            })
            .await?;
    }
    // A later timestamp sorts last regardless of its low sequence.
    uow.messages()
        .create(&NewMessage {
            conversation_id: conv_id,
            role: "assistant".to_owned(),
            content: "latest".to_owned(),
            created_at: Some(t0 + Duration::seconds(10)),
            metadata: json!({ "sequence": 0 }),
        })
        .await?;
    uow.commit().await?;

    let mut uow = UnitOfWork::begin(&pool).await?;
    let messages = uow.messages().get_by_conversation(conv_id).await?;
    uow.commit().await?;

    let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "second", "third", "latest"]);
    assert_eq!(messages[0].sequence(), 0);
    Ok(())
}

#[sqlx::test(migrator = "MIGRATOR")]
#[ignore = "requires pgvector docker image (see README)"]
async fn max_sequence_starts_at_minus_one(pool: PgPool) -> Result<()> {
    let conv_id = seed_conversation(&pool, "sequences").await?;

    let mut uow = UnitOfWork::begin(&pool).await?;
    assert_eq!(uow.messages().max_sequence(conv_id).await?, -1);
    uow.messages()
        .create(&NewMessage {
            conversation_id: conv_id,
            role: "user".to_owned(),
            content: "hello".to_owned(),
            created_at: None,
            metadata: json!({ "sequence": 4 }),
        })
        .await?;
    assert_eq!(uow.messages().max_sequence(conv_id).await?, 4);
    uow.commit().await?;
    Ok(())
}

#[sqlx::test(migrator = "MIGRATOR")]
#[ignore = "requires pgvector docker image (see README)"]
async fn deleting_a_conversation_cascades(pool: PgPool) -> Result<()> {
    let conv_id = seed_conversation(&pool, "cascade").await?;

    let mut uow = UnitOfWork::begin(&pool).await?;
    let message = uow
        .messages()
        .create(&NewMessage {
            conversation_id: conv_id,
            role: "user".to_owned(),
            content: "to be deleted".to_owned(),
            created_at: None,
            metadata: json!({ "sequence": 0 }),
        })
        .await?;
    uow.embeddings()
        .create_or_update(message.id, Vector::from(vec![0.0f32; 384]), "test-model")
        .await?;
    uow.commit().await?;

    let mut uow = UnitOfWork::begin(&pool).await?;
    assert!(uow.conversations().delete(conv_id).await?);
    assert!(uow.messages().get_by_id(message.id).await?.is_none());
    assert!(uow.embeddings().get_by_message_id(message.id).await?.is_none());
    uow.commit().await?;
    Ok(())
}

#[sqlx::test(migrator = "MIGRATOR")]
#[ignore = "requires pgvector docker image (see README)"]
async fn embedding_upsert_is_idempotent_on_message_id(pool: PgPool) -> Result<()> {
    let conv_id = seed_conversation(&pool, "upsert").await?;

    let mut uow = UnitOfWork::begin(&pool).await?;
    let message = uow
        .messages()
        .create(&NewMessage {
            conversation_id: conv_id,
            role: "user".to_owned(),
            content: "embed me".to_owned(),
            created_at: None,
            metadata: json!({ "sequence": 0 }),
        })
        .await?;
    uow.embeddings()
        .create_or_update(message.id, Vector::from(vec![0.1f32; 384]), "model-a")
        .await?;
    uow.embeddings()
        .create_or_update(message.id, Vector::from(vec![0.2f32; 384]), "model-b")
        .await?;
    uow.commit().await?;

    let count: i64 = sqlx::query_scalar("select count(*) from message_embeddings")
        .fetch_one(&pool)
        .await?;
    assert_eq!(count, 1);

    let mut uow = UnitOfWork::begin(&pool).await?;
    let row = uow.embeddings().get_by_message_id(message.id).await?.unwrap();
    uow.commit().await?;
    assert_eq!(row.model, "model-b");
    Ok(())
}

#[sqlx::test(migrator = "MIGRATOR")]
#[ignore = "requires pgvector docker image (see README)"]
async fn duplicate_source_identity_is_rejected(pool: PgPool) -> Result<()> {
    seed_conversation(&pool, "identity").await?;

    let mut uow = UnitOfWork::begin(&pool).await?;
    let duplicate = uow
        .conversations()
        .create(&NewConversation {
            title: "identity".to_owned(),
            source_type: Some("claude".to_owned()),
            source_id: Some("src-identity".to_owned()),
            ..Default::default()
        })
        .await;
    assert!(duplicate.is_err());
    Ok(())
}

#[sqlx::test(migrator = "MIGRATOR")]
#[ignore = "requires pgvector docker image (see README)"]
async fn summaries_expose_counts_and_assistant_preview(pool: PgPool) -> Result<()> {
    let conv_id = seed_conversation(&pool, "summary").await?;
    let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

    let mut uow = UnitOfWork::begin(&pool).await?;
    for (idx, (role, content)) in [
        ("user", "Question?"),
        ("assistant", "First answer"),
        ("assistant", "Latest answer"),
    ]
    .iter()
    .enumerate()
    {
        uow.messages()
            .create(&NewMessage {
                conversation_id: conv_id,
                role: (*role).to_owned(),
                content: (*content).to_owned(),
                created_at: Some(t0 + Duration::seconds(idx as i64)),
                metadata: json!({ "sequence": idx }),
            })
            .await?;
    }
    uow.commit().await?;

    let mut uow = UnitOfWork::begin(&pool).await?;
    let summaries = uow.conversations().list_summaries(10, 0).await?;
    uow.commit().await?;

    let summary = summaries.iter().find(|s| s.id == conv_id).unwrap();
    assert_eq!(summary.message_count, 3);
    assert_eq!(summary.preview.as_deref(), Some("Latest answer"));
    assert_eq!(summary.earliest_message_at.unwrap(), t0);
    assert_eq!(
        summary.latest_message_at.unwrap(),
        t0 + Duration::seconds(2)
    );
    Ok(())
}

#[sqlx::test(migrator = "MIGRATOR")]
#[ignore = "requires pgvector docker image (see README)"]
async fn text_search_paths_find_seeded_content(pool: PgPool) -> Result<()> {
    let conv_id = seed_conversation(&pool, "Postgres tuning notes").await?;

    let mut uow = UnitOfWork::begin(&pool).await?;
    uow.messages()
        .create(&NewMessage {
            conversation_id: conv_id,
            role: "assistant".to_owned(),
            content: "Use an ivfflat index for approximate vector search".to_owned(),
            created_at: None,
            metadata: json!({ "sequence": 0 }),
        })
        .await?;
    uow.commit().await?;

    let mut uow = UnitOfWork::begin(&pool).await?;
    let fts = uow.messages().search_full_text("vector search", 10, None).await?;
    assert_eq!(fts.len(), 1);
    assert!(fts[0].rank > 0.0);
    assert_eq!(fts[0].conversation_title, "Postgres tuning notes");

    // Trigram catches the typo FTS misses.
    let fuzzy = uow.messages().search_trigram("ivflat index", 10, 0.1).await?;
    assert_eq!(fuzzy.len(), 1);

    let by_title = uow.conversations().search_by_title("tuning", 10).await?;
    assert_eq!(by_title.len(), 1);

    assert!(uow.conversations().set_saved(conv_id, true).await?);
    let conv = uow.conversations().get_by_id(conv_id).await?.unwrap();
    assert!(conv.is_saved);
    uow.commit().await?;
    Ok(())
}

#[sqlx::test(migrator = "MIGRATOR")]
#[ignore = "requires pgvector docker image (see README)"]
async fn settings_put_get_roundtrip(pool: PgPool) -> Result<()> {
    let mut uow = UnitOfWork::begin(&pool).await?;
    uow.settings().put("watch_folder_enabled", "true", "import").await?;
    uow.settings().put("watch_folder_enabled", "false", "import").await?;
    let value = uow.settings().get_value("watch_folder_enabled").await?;
    let all = uow.settings().all(Some("import")).await?;
    uow.commit().await?;

    assert_eq!(value.as_deref(), Some("false"));
    assert_eq!(all.len(), 1);
    Ok(())
}
