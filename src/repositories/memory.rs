//! In-memory stores.
//!
//! Suitable for development, tests and single-instance deployments. Records
//! are lost when the process restarts.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{
        api_key::ApiKey,
        paging::{PageRequest, Slice, slice_sorted},
        session::Session,
        user::{User, UserProfile},
    },
};

use super::{ApiKeyStore, SessionStore, UserStore};

/// Sessions keyed by id. `BTreeMap` keeps v7 ids in creation order.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<BTreeMap<Uuid, Session>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of sessions currently stored.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.session_id, session.clone());
        Ok(())
    }

    async fn get(&self, session_id: &Uuid) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn touch(
        &self,
        session_id: &Uuid,
        date_modified: DateTime<Utc>,
        date_expires: DateTime<Utc>,
    ) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(session) => {
                session.date_modified = date_modified;
                session.date_expires = date_expires;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, session_id: &Uuid) -> Result<bool> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }

    async fn list(&self, user_id: &Uuid, page: &PageRequest) -> Result<Slice<Session>> {
        let owned: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == *user_id)
            .cloned()
            .collect();

        Ok(slice_sorted(&owned, page, |s| s.session_id.to_string()))
    }

    async fn count(&self, user_id: &Uuid) -> Result<u64> {
        let sessions = self.sessions.read().await;
        Ok(sessions.values().filter(|s| s.user_id == *user_id).count() as u64)
    }

    async fn prune_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        Ok(before.saturating_sub(sessions.len()) as u64)
    }
}

/// Accounts keyed by id, with an email index.
#[derive(Clone, Default)]
pub struct InMemoryUserStore {
    users: Arc<RwLock<UserTable>>,
}

#[derive(Default)]
struct UserTable {
    by_id: HashMap<Uuid, User>,
    by_email: HashMap<String, Uuid>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a full record, role and features included.
    pub async fn insert(&self, user: User) {
        let mut table = self.users.write().await;
        table.by_email.insert(user.email.clone(), user.user_id);
        table.by_id.insert(user.user_id, user);
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_id(&self, user_id: &Uuid) -> Result<Option<User>> {
        Ok(self.users.read().await.by_id.get(user_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let table = self.users.read().await;
        Ok(table
            .by_email
            .get(email)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn upsert(&self, profile: &UserProfile) -> Result<User> {
        let mut table = self.users.write().await;

        if let Some(id) = table.by_email.get(&profile.email).copied() {
            if let Some(user) = table.by_id.get_mut(&id) {
                user.first_name = profile.first_name.clone();
                user.last_name = profile.last_name.clone();
                user.date_modified = Utc::now();
                return Ok(user.clone());
            }
        }

        let user = User::from_profile(profile);
        table.by_email.insert(user.email.clone(), user.user_id);
        table.by_id.insert(user.user_id, user.clone());
        Ok(user)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryApiKeyStore {
    keys: Arc<RwLock<BTreeMap<Uuid, ApiKey>>>,
}

impl InMemoryApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiKeyStore for InMemoryApiKeyStore {
    async fn create(&self, api_key: &ApiKey) -> Result<()> {
        self.keys
            .write()
            .await
            .insert(api_key.api_key_id, api_key.clone());
        Ok(())
    }

    async fn get(&self, api_key_id: &Uuid) -> Result<Option<ApiKey>> {
        Ok(self.keys.read().await.get(api_key_id).cloned())
    }

    async fn list(&self, user_id: &Uuid, page: &PageRequest) -> Result<Slice<ApiKey>> {
        let owned: Vec<ApiKey> = self
            .keys
            .read()
            .await
            .values()
            .filter(|k| k.user_id == *user_id)
            .cloned()
            .collect();

        Ok(slice_sorted(&owned, page, |k| k.api_key_id.to_string()))
    }

    async fn count(&self, user_id: &Uuid) -> Result<u64> {
        let keys = self.keys.read().await;
        Ok(keys.values().filter(|k| k.user_id == *user_id).count() as u64)
    }

    async fn delete(&self, api_key_id: &Uuid) -> Result<bool> {
        Ok(self.keys.write().await.remove(api_key_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session_for(user_id: Uuid, expires_in: Duration) -> Session {
        let now = Utc::now();
        Session {
            session_id: Uuid::now_v7(),
            user_id,
            session_signature: "sig".to_string(),
            ip_address: "127.0.0.1".to_string(),
            user_agent: "test".to_string(),
            date_created: now,
            date_modified: now,
            date_expires: now + expires_in,
        }
    }

    fn profile(first_name: &str) -> UserProfile {
        UserProfile {
            email: "grace@example.com".to_string(),
            first_name: first_name.to_string(),
            last_name: "Hopper".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let store = InMemorySessionStore::new();
        let session = session_for(Uuid::now_v7(), Duration::hours(1));

        store.create(&session).await.unwrap();
        assert_eq!(store.get(&session.session_id).await.unwrap(), Some(session.clone()));

        assert!(store.delete(&session.session_id).await.unwrap());
        assert!(!store.delete(&session.session_id).await.unwrap());
        assert!(store.get(&session.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_touch_does_not_resurrect() {
        let store = InMemorySessionStore::new();
        let session = session_for(Uuid::now_v7(), Duration::hours(1));
        store.create(&session).await.unwrap();
        store.delete(&session.session_id).await.unwrap();

        let now = Utc::now();
        let touched = store
            .touch(&session.session_id, now, now + Duration::hours(2))
            .await
            .unwrap();

        assert!(!touched);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_user() {
        let store = InMemorySessionStore::new();
        let owner = Uuid::now_v7();

        for _ in 0..3 {
            store.create(&session_for(owner, Duration::hours(1))).await.unwrap();
        }
        store.create(&session_for(Uuid::now_v7(), Duration::hours(1))).await.unwrap();

        let slice = store.list(&owner, &PageRequest::first(2)).await.unwrap();
        assert_eq!(slice.items.len(), 2);
        assert!(slice.has_more);
        assert!(slice.items.iter().all(|s| s.user_id == owner));
        assert_eq!(store.count(&owner).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_prune_expired() {
        let store = InMemorySessionStore::new();
        store.create(&session_for(Uuid::now_v7(), Duration::hours(-1))).await.unwrap();
        store.create(&session_for(Uuid::now_v7(), Duration::hours(1))).await.unwrap();

        assert_eq!(store.prune_expired().await.unwrap(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_upsert_keeps_role_and_features() {
        let store = InMemoryUserStore::new();
        let created = store.upsert(&profile("Grace")).await.unwrap();

        let mut promoted = created.clone();
        promoted.role = crate::models::user::Role::Admin;
        store.insert(promoted).await;

        let updated = store.upsert(&profile("Rear Admiral")).await.unwrap();
        assert_eq!(updated.user_id, created.user_id);
        assert_eq!(updated.first_name, "Rear Admiral");
        assert_eq!(updated.role, crate::models::user::Role::Admin);
        assert_eq!(updated.features, created.features);
    }
}
