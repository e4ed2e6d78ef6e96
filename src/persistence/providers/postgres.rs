use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::persistence::ResultStore;

#[derive(Debug)]
pub struct PostgresResultStore {
    pool: PgPool,
}

impl PostgresResultStore {
    pub async fn new(connection_string: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(connection_string)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl ResultStore for PostgresResultStore {
    async fn latest_result_for_session(&self, session_id: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            r"
            SELECT raw_result::text AS raw
            FROM generation_results
            WHERE session_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            ",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("raw")?)),
            None => Ok(None),
        }
    }

    async fn save_result(&self, session_id: &str, raw: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO generation_results (session_id, raw_result, created_at)
            VALUES ($1, $2::jsonb, NOW())
            ",
        )
        .bind(session_id)
        .bind(raw)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
