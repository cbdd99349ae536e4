//! Job queue semantics against a real Postgres.
//!
//! Run with a pgvector-enabled database:
//!   DATABASE_URL=postgres://... cargo test -p recall-store -- --ignored

use std::collections::HashMap;

use anyhow::Result;
use serde_json::json;
use sqlx::PgPool;

use recall_store::{UnitOfWork, MIGRATOR};

#[sqlx::test(migrator = "MIGRATOR")]
#[ignore = "requires pgvector docker image (see README)"]
async fn dequeue_is_fifo_by_ready_time(pool: PgPool) -> Result<()> {
    let mut uow = UnitOfWork::begin(&pool).await?;
    let first = uow.jobs().enqueue("generate_embedding", &json!({"n": 1}), None).await?;
    let second = uow.jobs().enqueue("generate_embedding", &json!({"n": 2}), None).await?;
    uow.commit().await?;

    let mut uow = UnitOfWork::begin(&pool).await?;
    let a = uow.jobs().dequeue_next(None, 3).await?.expect("first job");
    let b = uow.jobs().dequeue_next(None, 3).await?.expect("second job");
    let c = uow.jobs().dequeue_next(None, 3).await?;
    uow.commit().await?;

    assert_eq!(a.id, first);
    assert_eq!(b.id, second);
    assert!(c.is_none());
    assert_eq!(a.status, "running");
    assert_eq!(a.attempts, 1);
    Ok(())
}

#[sqlx::test(migrator = "MIGRATOR")]
#[ignore = "requires pgvector docker image (see README)"]
async fn dequeue_filters_by_kind(pool: PgPool) -> Result<()> {
    let mut uow = UnitOfWork::begin(&pool).await?;
    uow.jobs().enqueue("youtube_transcription", &json!({}), None).await?;
    let embed_id = uow.jobs().enqueue("generate_embedding", &json!({}), None).await?;
    uow.commit().await?;

    let kinds = ["generate_embedding".to_owned()];
    let mut uow = UnitOfWork::begin(&pool).await?;
    let job = uow.jobs().dequeue_next(Some(&kinds), 3).await?.expect("embedding job");
    uow.commit().await?;
    assert_eq!(job.id, embed_id);
    assert_eq!(job.kind, "generate_embedding");
    Ok(())
}

#[sqlx::test(migrator = "MIGRATOR")]
#[ignore = "requires pgvector docker image (see README)"]
async fn future_not_before_is_not_eligible(pool: PgPool) -> Result<()> {
    let future = chrono::Utc::now() + chrono::Duration::hours(1);
    let mut uow = UnitOfWork::begin(&pool).await?;
    uow.jobs().enqueue("generate_embedding", &json!({}), Some(future)).await?;
    let job = uow.jobs().dequeue_next(None, 3).await?;
    uow.commit().await?;
    assert!(job.is_none());
    Ok(())
}

#[sqlx::test(migrator = "MIGRATOR")]
#[ignore = "requires pgvector docker image (see README)"]
async fn mark_failed_backs_off_then_fails_terminally(pool: PgPool) -> Result<()> {
    let mut uow = UnitOfWork::begin(&pool).await?;
    let id = uow.jobs().enqueue("generate_embedding", &json!({}), None).await?;
    uow.commit().await?;

    // First attempt: dequeue then fail -> pending with backoff.
    let mut uow = UnitOfWork::begin(&pool).await?;
    let job = uow.jobs().dequeue_next(None, 3).await?.unwrap();
    assert_eq!(job.attempts, 1);
    uow.jobs().mark_failed(id, 5, 3).await?;
    let job = uow.jobs().get_by_id(id).await?.unwrap();
    uow.commit().await?;
    assert_eq!(job.status, "pending");
    // Backoff of 5 * 2^0 minutes pushes not_before into the future.
    assert!(job.not_before > chrono::Utc::now() + chrono::Duration::minutes(4));

    // Force eligibility and burn the remaining attempts.
    for expected_attempts in 2..=3 {
        sqlx::query("update jobs set not_before = now() where id = $1")
            .bind(id)
            .execute(&pool)
            .await?;
        let mut uow = UnitOfWork::begin(&pool).await?;
        let job = uow.jobs().dequeue_next(None, 3).await?.unwrap();
        assert_eq!(job.attempts, expected_attempts);
        uow.jobs().mark_failed(id, 5, 3).await?;
        uow.commit().await?;
    }

    let mut uow = UnitOfWork::begin(&pool).await?;
    let job = uow.jobs().get_by_id(id).await?.unwrap();
    let eligible = uow.jobs().dequeue_next(None, 3).await?;
    uow.commit().await?;
    assert_eq!(job.status, "failed");
    assert_eq!(job.attempts, 3);
    assert!(eligible.is_none());
    Ok(())
}

#[sqlx::test(migrator = "MIGRATOR")]
#[ignore = "requires pgvector docker image (see README)"]
async fn cleanup_stuck_reverts_running_rows(pool: PgPool) -> Result<()> {
    let mut uow = UnitOfWork::begin(&pool).await?;
    let id = uow.jobs().enqueue("generate_embedding", &json!({}), None).await?;
    uow.jobs().dequeue_next(None, 3).await?.unwrap();
    uow.commit().await?;

    // Backdate the running row as if its worker died hours ago.
    sqlx::query("update jobs set updated_at = now() - interval '3 hours' where id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    let mut uow = UnitOfWork::begin(&pool).await?;
    let reclaimed = uow.jobs().cleanup_stuck(2).await?;
    let job = uow.jobs().get_by_id(id).await?.unwrap();
    uow.commit().await?;
    assert_eq!(reclaimed, 1);
    assert_eq!(job.status, "pending");
    Ok(())
}

#[sqlx::test(migrator = "MIGRATOR")]
#[ignore = "requires pgvector docker image (see README)"]
async fn cleanup_completed_prunes_old_rows(pool: PgPool) -> Result<()> {
    let mut uow = UnitOfWork::begin(&pool).await?;
    let id = uow.jobs().enqueue("generate_embedding", &json!({}), None).await?;
    uow.jobs().dequeue_next(None, 3).await?.unwrap();
    uow.jobs().mark_completed(id).await?;
    uow.commit().await?;

    sqlx::query("update jobs set updated_at = now() - interval '30 days' where id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    let mut uow = UnitOfWork::begin(&pool).await?;
    let pruned = uow.jobs().cleanup_completed(7).await?;
    let job = uow.jobs().get_by_id(id).await?;
    uow.commit().await?;
    assert_eq!(pruned, 1);
    assert!(job.is_none());
    Ok(())
}

/// Spec scenario: 100 jobs, 4 concurrent workers, every job completes
/// exactly once and no job is double-delivered.
#[sqlx::test(migrator = "MIGRATOR")]
#[ignore = "requires pgvector docker image (see README)"]
async fn queue_fairness_under_concurrency(pool: PgPool) -> Result<()> {
    let mut uow = UnitOfWork::begin(&pool).await?;
    for n in 0..100 {
        uow.jobs().enqueue("generate_embedding", &json!({"n": n}), None).await?;
    }
    uow.commit().await?;

    let mut handles = Vec::new();
    for worker in 0..4 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed: Vec<i64> = Vec::new();
            loop {
                let mut uow = UnitOfWork::begin(&pool).await.unwrap();
                let job = uow.jobs().dequeue_next(None, 3).await.unwrap();
                match job {
                    Some(job) => {
                        uow.jobs().mark_completed(job.id).await.unwrap();
                        uow.commit().await.unwrap();
                        claimed.push(job.id);
                    }
                    None => {
                        uow.commit().await.unwrap();
                        break;
                    }
                }
            }
            (worker, claimed)
        }));
    }

    let mut deliveries: HashMap<i64, usize> = HashMap::new();
    for handle in handles {
        let (_, claimed) = handle.await?;
        for id in claimed {
            *deliveries.entry(id).or_default() += 1;
        }
    }

    // Every job delivered to exactly one worker, exactly once.
    assert_eq!(deliveries.len(), 100);
    assert!(deliveries.values().all(|&count| count == 1));

    let mut uow = UnitOfWork::begin(&pool).await?;
    let completed = uow.jobs().count_by_status("completed").await?;
    let attempts: i64 = sqlx::query_scalar("select coalesce(sum(attempts), 0) from jobs")
        .fetch_one(&pool)
        .await?;
    uow.commit().await?;
    assert_eq!(completed, 100);
    assert!(attempts >= 100);
    Ok(())
}
