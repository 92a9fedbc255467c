//! Redis-backed session store.
//!
//! Records live under `session:{id}` as JSON with a TTL equal to their
//! remaining lifetime. Each user has a `user_sessions:{user_id}` sorted set
//! (all scores 0) indexing their session ids lexicographically, which is
//! creation order for v7 ids and what cursor pagination walks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, aio::ConnectionManager};
use uuid::Uuid;

use crate::{
    error::Result,
    models::{
        paging::{Cursor, PageRequest, Slice},
        session::Session,
    },
};

use super::SessionStore;

fn session_key(session_id: &Uuid) -> String {
    format!("session:{}", session_id)
}

fn index_key(user_id: &Uuid) -> String {
    format!("user_sessions:{}", user_id)
}

/// Seconds until `expires`, at least one so `SET EX` accepts it.
fn ttl_seconds(expires: DateTime<Utc>) -> u64 {
    (expires - Utc::now()).num_seconds().max(1) as u64
}

#[derive(Clone)]
pub struct RedisSessionStore {
    redis: ConnectionManager,
}

impl RedisSessionStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Loads the records behind `ids`, dropping index entries whose record expired.
    async fn load(&self, user_id: &Uuid, ids: &[String]) -> Result<Vec<Session>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.redis.clone();
        let keys: Vec<String> = ids.iter().map(|id| format!("session:{}", id)).collect();
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        let mut sessions = Vec::with_capacity(ids.len());
        let mut stale = Vec::new();
        for (id, json) in ids.iter().zip(raw) {
            match json {
                Some(json) => sessions.push(sonic_rs::from_str::<Session>(&json)?),
                None => stale.push(id.clone()),
            }
        }

        if !stale.is_empty() {
            tracing::debug!("Dropping {} stale session index entries", stale.len());
            let _: () = conn.zrem(index_key(user_id), &stale).await?;
        }

        Ok(sessions)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(&self, session: &Session) -> Result<()> {
        let json = sonic_rs::to_string(session)?;
        let mut conn = self.redis.clone();

        let _: () = redis::pipe()
            .atomic()
            .set_ex(
                session_key(&session.session_id),
                &json,
                ttl_seconds(session.date_expires),
            )
            .ignore()
            .zadd(index_key(&session.user_id), session.session_id.to_string(), 0)
            .ignore()
            .query_async(&mut conn)
            .await?;

        tracing::debug!("Session saved to Redis: session:{}", session.session_id);
        Ok(())
    }

    async fn get(&self, session_id: &Uuid) -> Result<Option<Session>> {
        let mut conn = self.redis.clone();
        let json: Option<String> = conn.get(session_key(session_id)).await?;

        json.map(|j| sonic_rs::from_str::<Session>(&j).map_err(Into::into))
            .transpose()
    }

    async fn touch(
        &self,
        session_id: &Uuid,
        date_modified: DateTime<Utc>,
        date_expires: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(mut session) = self.get(session_id).await? else {
            return Ok(false);
        };
        session.date_modified = date_modified;
        session.date_expires = date_expires;

        let json = sonic_rs::to_string(&session)?;
        let mut conn = self.redis.clone();

        // XX: only overwrite a record that still exists.
        let written: Option<String> = redis::cmd("SET")
            .arg(session_key(session_id))
            .arg(&json)
            .arg("XX")
            .arg("EX")
            .arg(ttl_seconds(date_expires))
            .query_async(&mut conn)
            .await?;

        Ok(written.is_some())
    }

    async fn delete(&self, session_id: &Uuid) -> Result<bool> {
        let Some(session) = self.get(session_id).await? else {
            return Ok(false);
        };
        let mut conn = self.redis.clone();

        let (deleted,): (i64,) = redis::pipe()
            .atomic()
            .del(session_key(session_id))
            .zrem(index_key(&session.user_id), session_id.to_string())
            .ignore()
            .query_async(&mut conn)
            .await?;

        tracing::debug!("Session deleted from Redis: session:{}", session_id);
        Ok(deleted > 0)
    }

    async fn list(&self, user_id: &Uuid, page: &PageRequest) -> Result<Slice<Session>> {
        let mut conn = self.redis.clone();
        let key = index_key(user_id);
        let fetch = (page.limit + 1) as isize;

        let mut ids: Vec<String> = match &page.cursor {
            None => conn.zrangebylex_limit(&key, "-", "+", 0, fetch).await?,
            Some(Cursor::After(boundary)) => {
                conn.zrangebylex_limit(&key, format!("({}", boundary), "+", 0, fetch)
                    .await?
            }
            Some(Cursor::Before(boundary)) => {
                conn.zrevrangebylex_limit(&key, format!("({}", boundary), "-", 0, fetch)
                    .await?
            }
        };

        let has_more = ids.len() > page.limit;
        ids.truncate(page.limit);
        if matches!(page.cursor, Some(Cursor::Before(_))) {
            ids.reverse();
        }

        Ok(Slice {
            items: self.load(user_id, &ids).await?,
            has_more,
        })
    }

    async fn count(&self, user_id: &Uuid) -> Result<u64> {
        let mut conn = self.redis.clone();
        let count: u64 = conn.zcard(index_key(user_id)).await?;
        Ok(count)
    }

    async fn prune_expired(&self) -> Result<u64> {
        let mut conn = self.redis.clone();
        let mut cursor: u64 = 0;
        let mut pruned: u64 = 0;

        // Records expire on their own; walk the indexes and drop dangling ids.
        loop {
            let (next, index_keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg("user_sessions:*")
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            for index in index_keys {
                let ids: Vec<String> = conn.zrange(&index, 0, -1).await?;
                if ids.is_empty() {
                    continue;
                }

                let keys: Vec<String> = ids.iter().map(|id| format!("session:{}", id)).collect();
                let raw: Vec<Option<String>> = redis::cmd("MGET")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await?;

                let stale: Vec<&String> = ids
                    .iter()
                    .zip(raw.iter())
                    .filter(|(_, json)| json.is_none())
                    .map(|(id, _)| id)
                    .collect();

                if !stale.is_empty() {
                    let removed: u64 = conn.zrem(&index, stale).await?;
                    pruned += removed;
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(pruned)
    }
}
