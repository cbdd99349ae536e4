use anyhow::Result;
use sqlx::{Postgres, Transaction};

use crate::rows::SettingRow;

/// Small durable KV used for runtime configuration and worker heartbeats.
pub struct SettingRepo<'a> {
    pub(crate) tx: &'a mut Transaction<'static, Postgres>,
}

impl SettingRepo<'_> {
    pub async fn get(&mut self, id: &str) -> Result<Option<SettingRow>> {
        let row = sqlx::query_as::<_, SettingRow>(
            "select id, value, category, updated_at from settings where id = $1",
        )
        .bind(id)
        .fetch_optional(&mut **self.tx)
        .await?;
        Ok(row)
    }

    pub async fn get_value(&mut self, id: &str) -> Result<Option<String>> {
        Ok(self.get(id).await?.map(|row| row.value))
    }

    pub async fn put(&mut self, id: &str, value: &str, category: &str) -> Result<()> {
        sqlx::query(
            r#"
            insert into settings (id, value, category, updated_at)
            values ($1, $2, $3, now())
            on conflict (id)
            do update set value = excluded.value,
                          category = excluded.category,
                          updated_at = now()
            "#,
        )
        .bind(id)
        .bind(value)
        .bind(category)
        .execute(&mut **self.tx)
        .await?;
        Ok(())
    }

    pub async fn all(&mut self, category: Option<&str>) -> Result<Vec<SettingRow>> {
        let rows = sqlx::query_as::<_, SettingRow>(
            r#"
            select id, value, category, updated_at from settings
            where ($1::text is null or category = $1)
            order by id
            "#,
        )
        .bind(category)
        .fetch_all(&mut **self.tx)
        .await?;
        Ok(rows)
    }

    pub async fn delete(&mut self, id: &str) -> Result<bool> {
        let result = sqlx::query("delete from settings where id = $1")
            .bind(id)
            .execute(&mut **self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
