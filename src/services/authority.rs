//! Session lifecycle: authorize, reauthorize, unauthorize, list and revoke.
//!
//! `authorize` returns the full [`Authorization`] (token, session record and
//! user); every other transition answers with a `bool`. Handlers and the
//! request guard rely on exactly this contract.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::{
    crypto::{
        signature::{derive_signature, session_key_prefix, signatures_match},
        token::SessionToken,
    },
    error::{AppError, Result},
    models::{
        outcome::BulkOutcome,
        paging::{PageRequest, Paginated},
        session::Session,
        user::{User, UserProfile},
    },
    repositories::{SessionStore, UserStore},
    verifier::AccessTokenVerifier,
};

/// Proof of identity presented at sign-in.
#[derive(Clone)]
pub struct IdentityProof {
    pub access_token: Zeroizing<String>,
    pub profile: UserProfile,
}

/// The client context a request claims to come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub ip_address: String,
    pub user_agent: String,
}

/// Result of a successful `authorize`.
#[derive(Debug, Clone)]
pub struct Authorization {
    /// Opaque token for the client. Only ever returned here.
    pub token: String,
    pub session: Session,
    pub user: User,
}

/// The session lifecycle capability set.
#[async_trait]
pub trait Authority: Send + Sync {
    async fn authorize(
        &self,
        proof: IdentityProof,
        context: &ClientContext,
        raw_session_key: &str,
    ) -> Result<Authorization>;

    async fn reauthorize(&self, token: &str, context: &ClientContext) -> Result<bool>;

    async fn unauthorize(&self, token: &str, context: &ClientContext) -> Result<bool>;

    async fn get_sessions(&self, user_id: &Uuid, page: &PageRequest) -> Result<Paginated<Session>>;

    async fn get_session(&self, session_id: &Uuid) -> Result<Option<Session>>;

    async fn revoke_session(&self, session_id: &Uuid) -> Result<bool>;

    /// Best-effort removal of `session_ids` owned by `user_id`.
    async fn revoke_sessions(&self, user_id: &Uuid, session_ids: &[Uuid]) -> Result<BulkOutcome>;

    /// Attributes a request to its session and user without side effects.
    async fn resolve(&self, token: &str, context: &ClientContext) -> Result<(Session, User)>;
}

/// Store-backed [`Authority`].
pub struct SessionAuthority {
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
    verifier: Arc<dyn AccessTokenVerifier>,
    salt: Zeroizing<String>,
    session_duration: chrono::Duration,
    timeout: Duration,
}

impl SessionAuthority {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore>,
        verifier: Arc<dyn AccessTokenVerifier>,
        salt: Zeroizing<String>,
        session_duration: chrono::Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            users,
            verifier,
            salt,
            session_duration,
            timeout,
        }
    }

    /// Runs one I/O call under the configured deadline.
    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(operation.to_string())),
        }
    }

    /// Loads the session named by `token` and checks its signature against
    /// the presented context.
    async fn check(&self, token: &SessionToken, context: &ClientContext) -> Result<Session> {
        let session_id = token.session_id();
        let session = self
            .bounded("get_session", self.sessions.get(&session_id))
            .await?
            .ok_or_else(|| {
                tracing::debug!("Session not found: {}", session_id);
                AppError::InvalidSession
            })?;

        if session.is_expired(Utc::now()) {
            tracing::info!("Session expired: {}", session_id);
            return Err(AppError::InvalidSession);
        }

        let presented = derive_signature(
            token.session_key(),
            &context.ip_address,
            &context.user_agent,
            &self.salt,
        );

        if !signatures_match(&session.session_signature, &presented) {
            tracing::warn!(
                "Session signature mismatch: session={} user={} ip={}",
                session_id,
                session.user_id,
                context.ip_address
            );
            return Err(AppError::InvalidSession);
        }

        Ok(session)
    }
}

#[async_trait]
impl Authority for SessionAuthority {
    async fn authorize(
        &self,
        proof: IdentityProof,
        context: &ClientContext,
        raw_session_key: &str,
    ) -> Result<Authorization> {
        let session_key = session_key_prefix(raw_session_key)?;

        let verified = self
            .bounded(
                "verify_access_token",
                self.verifier.verify(&proof.access_token, &proof.profile.email),
            )
            .await?;
        if !verified {
            tracing::warn!("Access token rejected by identity provider: ip={}", context.ip_address);
            return Err(AppError::InvalidAccessToken);
        }

        let user = self
            .bounded("upsert_user", self.users.upsert(&proof.profile))
            .await?;

        let now = Utc::now();
        let session = Session {
            session_id: Uuid::now_v7(),
            user_id: user.user_id,
            session_signature: derive_signature(
                session_key,
                &context.ip_address,
                &context.user_agent,
                &self.salt,
            ),
            ip_address: context.ip_address.clone(),
            user_agent: context.user_agent.clone(),
            date_created: now,
            date_modified: now,
            date_expires: now + self.session_duration,
        };

        self.bounded("create_session", self.sessions.create(&session))
            .await?;

        let token = SessionToken::new(session.session_id, session_key)?.encode();
        tracing::info!("✅ Session {} authorized for user {}", session.session_id, user.user_id);

        Ok(Authorization {
            token,
            session,
            user,
        })
    }

    async fn reauthorize(&self, token: &str, context: &ClientContext) -> Result<bool> {
        let token = SessionToken::parse(token)?;
        let session = self.check(&token, context).await?;

        let now = Utc::now();
        let extended = self
            .bounded(
                "touch_session",
                self.sessions
                    .touch(&session.session_id, now, now + self.session_duration),
            )
            .await?;

        if !extended {
            tracing::info!("Session {} disappeared during reauthorization", session.session_id);
            return Err(AppError::InvalidSession);
        }

        tracing::debug!("Session {} reauthorized", session.session_id);
        Ok(true)
    }

    async fn unauthorize(&self, token: &str, context: &ClientContext) -> Result<bool> {
        let token = SessionToken::parse(token)?;

        let Some(_) = self
            .bounded("get_session", self.sessions.get(&token.session_id()))
            .await?
        else {
            tracing::debug!("Unauthorize of absent session {}", token.session_id());
            return Ok(false);
        };

        let session = self.check(&token, context).await?;
        let deleted = self
            .bounded("delete_session", self.sessions.delete(&session.session_id))
            .await?;

        tracing::info!("👋 Session {} unauthorized for user {}", session.session_id, session.user_id);
        Ok(deleted)
    }

    async fn get_sessions(&self, user_id: &Uuid, page: &PageRequest) -> Result<Paginated<Session>> {
        let slice = self
            .bounded("list_sessions", self.sessions.list(user_id, page))
            .await?;
        let total = self
            .bounded("count_sessions", self.sessions.count(user_id))
            .await?;

        Ok(Paginated::from_slice(page, slice, Some(total), |s| {
            s.session_id.to_string()
        }))
    }

    async fn get_session(&self, session_id: &Uuid) -> Result<Option<Session>> {
        self.bounded("get_session", self.sessions.get(session_id))
            .await
    }

    async fn revoke_session(&self, session_id: &Uuid) -> Result<bool> {
        let deleted = self
            .bounded("delete_session", self.sessions.delete(session_id))
            .await?;
        if deleted {
            tracing::info!("Session {} revoked", session_id);
        }
        Ok(deleted)
    }

    async fn revoke_sessions(&self, user_id: &Uuid, session_ids: &[Uuid]) -> Result<BulkOutcome> {
        let attempts = session_ids.iter().map(|session_id| async move {
            let owned = match self.get_session(session_id).await {
                Ok(Some(session)) => session.user_id == *user_id,
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!("Bulk revoke lookup failed for {}: {}", session_id, e);
                    false
                }
            };
            if !owned {
                return (*session_id, false);
            }

            match self.revoke_session(session_id).await {
                Ok(deleted) => (*session_id, deleted),
                Err(e) => {
                    tracing::warn!("Bulk revoke failed for {}: {}", session_id, e);
                    (*session_id, false)
                }
            }
        });

        let mut outcome = BulkOutcome::default();
        for (session_id, removed) in join_all(attempts).await {
            outcome.record(session_id, removed);
        }

        tracing::info!(
            "Bulk revoke for user {}: {} succeeded, {} failed",
            user_id,
            outcome.succeeded.len(),
            outcome.failed.len()
        );
        Ok(outcome)
    }

    async fn resolve(&self, token: &str, context: &ClientContext) -> Result<(Session, User)> {
        let token = SessionToken::parse(token)?;
        let session = self.check(&token, context).await?;

        let user = self
            .bounded("find_user", self.users.find_by_id(&session.user_id))
            .await?
            .ok_or_else(|| {
                tracing::warn!("Session {} points at a missing user", session.session_id);
                AppError::InvalidSession
            })?;

        Ok((session, user))
    }
}
