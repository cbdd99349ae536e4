use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Postgres, Transaction};

use crate::rows::JobRow;

const JOB_COLUMNS: &str = "id, kind, payload, status, attempts, not_before, created_at, updated_at";

pub struct JobRepo<'a> {
    pub(crate) tx: &'a mut Transaction<'static, Postgres>,
}

impl JobRepo<'_> {
    /// Enqueue a job; eligible immediately unless `not_before` is given.
    pub async fn enqueue(
        &mut self,
        kind: &str,
        payload: &Value,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            insert into jobs (kind, payload, not_before)
            values ($1, $2, coalesce($3, now()))
            returning id
            "#,
        )
        .bind(kind)
        .bind(payload)
        .bind(not_before)
        .fetch_one(&mut **self.tx)
        .await?;
        Ok(id)
    }

    /// Atomically claim the next ready job.
    ///
    /// Selects the smallest `(not_before, id)` row that is pending, due, and
    /// under the attempt cap, flips it to `running`, and increments
    /// `attempts` in the same statement. `FOR UPDATE SKIP LOCKED` makes
    /// concurrent workers skip rows another worker is claiming instead of
    /// blocking on them. Returns `None` when nothing is eligible.
    pub async fn dequeue_next(
        &mut self,
        kinds: Option<&[String]>,
        max_attempts: i32,
    ) -> Result<Option<JobRow>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            update jobs
            set status = 'running',
                attempts = attempts + 1,
                updated_at = now()
            where id = (
                select id from jobs
                where status = 'pending'
                  and not_before <= now()
                  and attempts < $1
                  and ($2::text[] is null or kind = any($2))
                order by not_before, id
                for update skip locked
                limit 1
            )
            returning {JOB_COLUMNS}
            "#,
        ))
        .bind(max_attempts)
        .bind(kinds)
        .fetch_optional(&mut **self.tx)
        .await?;
        Ok(row)
    }

    pub async fn mark_completed(&mut self, id: i64) -> Result<bool> {
        let result =
            sqlx::query("update jobs set status = 'completed', updated_at = now() where id = $1")
                .bind(id)
                .execute(&mut **self.tx)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fail a job. Under the attempt cap it goes back to `pending` with
    /// exponential backoff (`retry_minutes * 2^(attempts-1)`); at the cap it
    /// becomes terminally `failed`.
    pub async fn mark_failed(
        &mut self,
        id: i64,
        retry_minutes: i64,
        max_attempts: i32,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            update jobs
            set status = case when attempts >= $2 then 'failed' else 'pending' end,
                not_before = case when attempts >= $2 then not_before
                                  else now() + make_interval(mins => ($3 * (1 << greatest(attempts - 1, 0)))::int)
                             end,
                updated_at = now()
            where id = $1
            "#,
        )
        .bind(id)
        .bind(max_attempts)
        .bind(retry_minutes)
        .execute(&mut **self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fail a job with no retry, regardless of remaining attempts. Used for
    /// permanently broken work (invalid payload, deleted message).
    pub async fn mark_failed_permanently(&mut self, id: i64) -> Result<bool> {
        let result =
            sqlx::query("update jobs set status = 'failed', updated_at = now() where id = $1")
                .bind(id)
                .execute(&mut **self.tx)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Recover jobs abandoned by crashed workers: anything `running` and
    /// untouched for `hours` reverts to `pending`.
    pub async fn cleanup_stuck(&mut self, hours: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            update jobs
            set status = 'pending', not_before = now(), updated_at = now()
            where status = 'running'
              and updated_at < now() - make_interval(hours => $1::int)
            "#,
        )
        .bind(hours)
        .execute(&mut **self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    /// Prune completed jobs older than `days`.
    pub async fn cleanup_completed(&mut self, days: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            delete from jobs
            where status = 'completed'
              and updated_at < now() - make_interval(days => $1::int)
            "#,
        )
        .bind(days)
        .execute(&mut **self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn get_by_id(&mut self, id: i64) -> Result<Option<JobRow>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "select {JOB_COLUMNS} from jobs where id = $1",
        ))
        .bind(id)
        .fetch_optional(&mut **self.tx)
        .await?;
        Ok(row)
    }

    pub async fn count_by_status(&mut self, status: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("select count(*) from jobs where status = $1")
            .bind(status)
            .fetch_one(&mut **self.tx)
            .await?;
        Ok(count)
    }

    /// (status, count) pairs across the whole table.
    pub async fn status_counts(&mut self) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("select status, count(*) from jobs group by status order by status")
                .fetch_all(&mut **self.tx)
                .await?;
        Ok(rows)
    }

    /// Pending backlog broken down by kind.
    pub async fn pending_by_kind(&mut self) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "select kind, count(*) from jobs where status = 'pending' group by kind order by kind",
        )
        .fetch_all(&mut **self.tx)
        .await?;
        Ok(rows)
    }
}
