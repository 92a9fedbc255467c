use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{
        api_key::ApiKey,
        paging::{Cursor, PageRequest, Slice},
    },
};

use super::ApiKeyStore;

fn row_to_api_key(row: &Row) -> Result<ApiKey> {
    Ok(ApiKey {
        api_key_id: row.try_get("api_key_id").map_err(|_| AppError::MissingData("api_key_id".to_string()))?,
        api_key: row.try_get("api_key").map_err(|_| AppError::MissingData("api_key".to_string()))?,
        user_id: row.try_get("user_id").map_err(|_| AppError::MissingData("user_id".to_string()))?,
        label: row.try_get("label").map_err(|_| AppError::MissingData("label".to_string()))?,
        date_created: row.try_get("date_created").map_err(|_| AppError::MissingData("date_created".to_string()))?,
    })
}

/// Postgres-backed API key store.
#[derive(Clone)]
pub struct PgApiKeyStore {
    pool: Pool,
}

impl PgApiKeyStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeyStore for PgApiKeyStore {
    async fn create(&self, api_key: &ApiKey) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO api_keys (api_key_id, api_key, user_id, label, date_created)
                VALUES ($1, $2, $3, $4, $5)
                "#,
                &[
                    &api_key.api_key_id,
                    &api_key.api_key,
                    &api_key.user_id,
                    &api_key.label,
                    &api_key.date_created,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, api_key_id: &Uuid) -> Result<Option<ApiKey>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT *
                FROM api_keys
                WHERE api_key_id = $1
                "#,
                &[api_key_id],
            )
            .await?;
        row.map(|r| row_to_api_key(&r)).transpose()
    }

    async fn list(&self, user_id: &Uuid, page: &PageRequest) -> Result<Slice<ApiKey>> {
        let client = self.pool.get().await?;
        let fetch = (page.limit + 1) as i64;

        let rows = match &page.cursor {
            None => {
                client
                    .query(
                        r#"
                        SELECT *
                        FROM api_keys
                        WHERE user_id = $1
                        ORDER BY api_key_id ASC
                        LIMIT $2
                        "#,
                        &[user_id, &fetch],
                    )
                    .await?
            }
            Some(Cursor::After(boundary)) => {
                let boundary = parse_boundary(boundary)?;
                client
                    .query(
                        r#"
                        SELECT *
                        FROM api_keys
                        WHERE user_id = $1 AND api_key_id > $2
                        ORDER BY api_key_id ASC
                        LIMIT $3
                        "#,
                        &[user_id, &boundary, &fetch],
                    )
                    .await?
            }
            Some(Cursor::Before(boundary)) => {
                let boundary = parse_boundary(boundary)?;
                client
                    .query(
                        r#"
                        SELECT *
                        FROM api_keys
                        WHERE user_id = $1 AND api_key_id < $2
                        ORDER BY api_key_id DESC
                        LIMIT $3
                        "#,
                        &[user_id, &boundary, &fetch],
                    )
                    .await?
            }
        };

        let mut items = rows
            .iter()
            .map(row_to_api_key)
            .collect::<Result<Vec<_>>>()?;

        let has_more = items.len() > page.limit;
        items.truncate(page.limit);
        if matches!(page.cursor, Some(Cursor::Before(_))) {
            items.reverse();
        }

        Ok(Slice { items, has_more })
    }

    async fn count(&self, user_id: &Uuid) -> Result<u64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                r#"
                SELECT COUNT(*) AS total
                FROM api_keys
                WHERE user_id = $1
                "#,
                &[user_id],
            )
            .await?;
        let total: i64 = row
            .try_get("total")
            .map_err(|_| AppError::MissingData("total".to_string()))?;
        Ok(total.max(0) as u64)
    }

    async fn delete(&self, api_key_id: &Uuid) -> Result<bool> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute(
                r#"
                DELETE FROM api_keys
                WHERE api_key_id = $1
                "#,
                &[api_key_id],
            )
            .await?;
        Ok(deleted > 0)
    }
}

fn parse_boundary(boundary: &str) -> Result<Uuid> {
    Uuid::parse_str(boundary).map_err(|_| AppError::validation("cursor", "Invalid paging cursor"))
}
