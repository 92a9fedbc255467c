//! Storage seams for sessions, users and API keys.
//!
//! Each role is one flat trait. Production wires Redis (sessions) and
//! Postgres (users, API keys); tests and local runs use the in-memory
//! implementations from [`memory`].

pub mod api_key;
pub mod memory;
pub mod session;
pub mod user;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::Result,
    models::{
        api_key::ApiKey,
        paging::{PageRequest, Slice},
        session::Session,
        user::{User, UserProfile},
    },
};

pub use api_key::PgApiKeyStore;
pub use memory::{InMemoryApiKeyStore, InMemorySessionStore, InMemoryUserStore};
pub use session::RedisSessionStore;
pub use user::PgUserStore;

/// Durable session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Writes a new record. Either the whole record is stored or nothing is.
    async fn create(&self, session: &Session) -> Result<()>;

    async fn get(&self, session_id: &Uuid) -> Result<Option<Session>>;

    /// Refreshes the temporal fields of an existing record.
    ///
    /// Returns `false` without writing anything when the record is gone, so a
    /// concurrent revocation is never undone.
    async fn touch(
        &self,
        session_id: &Uuid,
        date_modified: DateTime<Utc>,
        date_expires: DateTime<Utc>,
    ) -> Result<bool>;

    /// Removes a record. Returns whether anything was removed.
    async fn delete(&self, session_id: &Uuid) -> Result<bool>;

    /// Sessions of `user_id`, ordered by session id.
    async fn list(&self, user_id: &Uuid, page: &PageRequest) -> Result<Slice<Session>>;

    async fn count(&self, user_id: &Uuid) -> Result<u64>;

    /// Drops expired records and stale index entries. Returns how many were removed.
    async fn prune_expired(&self) -> Result<u64>;
}

/// Account records. The session authority reads and upserts, never deletes.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, user_id: &Uuid) -> Result<Option<User>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Creates the account for `profile.email` if absent, otherwise updates
    /// its name fields only. Role and features are set on creation only.
    async fn upsert(&self, profile: &UserProfile) -> Result<User>;
}

/// API key records.
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn create(&self, api_key: &ApiKey) -> Result<()>;

    async fn get(&self, api_key_id: &Uuid) -> Result<Option<ApiKey>>;

    /// Keys of `user_id`, ordered by key id.
    async fn list(&self, user_id: &Uuid, page: &PageRequest) -> Result<Slice<ApiKey>>;

    async fn count(&self, user_id: &Uuid) -> Result<u64>;

    async fn delete(&self, api_key_id: &Uuid) -> Result<bool>;
}
