use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::user::{Features, Role, User, UserProfile},
};

use super::UserStore;

/// A helper function to map a `tokio_postgres::Row` to a `User`.
fn row_to_user(row: &Row) -> Result<User> {
    let features: i32 = row
        .try_get("features")
        .map_err(|_| AppError::MissingData("features".to_string()))?;

    Ok(User {
        user_id: row.try_get("user_id").map_err(|_| AppError::MissingData("user_id".to_string()))?,
        email: row.try_get("email").map_err(|_| AppError::MissingData("email".to_string()))?,
        first_name: row.try_get("first_name").map_err(|_| AppError::MissingData("first_name".to_string()))?,
        last_name: row.try_get("last_name").map_err(|_| AppError::MissingData("last_name".to_string()))?,
        role: row.try_get::<_, Role>("role").map_err(|_| AppError::MissingData("role".to_string()))?,
        features: Features::from_bits(features as u32),
        date_created: row.try_get("date_created").map_err(|_| AppError::MissingData("date_created".to_string()))?,
        date_modified: row.try_get("date_modified").map_err(|_| AppError::MissingData("date_modified".to_string()))?,
    })
}

/// Postgres-backed account store.
#[derive(Clone)]
pub struct PgUserStore {
    pool: Pool,
}

impl PgUserStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, user_id: &Uuid) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT *
                FROM users
                WHERE user_id = $1
                "#,
                &[user_id],
            )
            .await?;
        row.map(|r| row_to_user(&r)).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT *
                FROM users
                WHERE email = $1
                "#,
                &[&email],
            )
            .await?;
        row.map(|r| row_to_user(&r)).transpose()
    }

    async fn upsert(&self, profile: &UserProfile) -> Result<User> {
        let fresh = User::from_profile(profile);
        let features = fresh.features.bits() as i32;

        let client = self.pool.get().await?;
        // Role and features only land on INSERT; a conflict touches names only.
        let row = client
            .query_one(
                r#"
                INSERT INTO users (user_id, email, first_name, last_name, role, features)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (email) DO UPDATE
                SET
                    first_name = EXCLUDED.first_name,
                    last_name = EXCLUDED.last_name,
                    date_modified = NOW()
                RETURNING *
                "#,
                &[
                    &fresh.user_id,
                    &fresh.email,
                    &fresh.first_name,
                    &fresh.last_name,
                    &fresh.role,
                    &features,
                ],
            )
            .await?;
        row_to_user(&row)
    }
}
