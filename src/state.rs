use std::sync::Arc;

use axum::extract::FromRef;
use redis::aio::ConnectionManager;

use crate::cache::HttpCache;
use crate::config::{Config, TrustedProxies};
use crate::error::Result;
use crate::repositories::{
    ApiKeyStore, InMemoryApiKeyStore, InMemorySessionStore, InMemoryUserStore, PgApiKeyStore,
    PgUserStore, RedisSessionStore, SessionStore,
};
use crate::services::{Authority, SessionAuthority};
use crate::verifier::{AccessTokenVerifier, UserInfoVerifier};

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// Session lifecycle.
    pub authority: Arc<dyn Authority>,
    /// Session records, for maintenance jobs.
    pub sessions: Arc<dyn SessionStore>,
    pub api_keys: Arc<dyn ApiKeyStore>,
    /// The conditional-request cache.
    pub cache: HttpCache,
    /// The application's configuration.
    pub config: Config,
}

impl FromRef<AppState> for HttpCache {
    fn from_ref(state: &AppState) -> Self {
        state.cache.clone()
    }
}

impl FromRef<AppState> for TrustedProxies {
    fn from_ref(state: &AppState) -> Self {
        state.config.trusted_proxies.clone()
    }
}

fn build_cache(config: &Config) -> HttpCache {
    HttpCache::new(config.cache_ttl, config.cache_max_age, Vec::new())
}

impl AppState {
    /// Connects to PostgreSQL, Redis and the identity provider.
    pub async fn new(config: &Config) -> Result<Self> {
        let db = crate::db::create_pool(&config.database_url, 16, config.store_timeout)?;
        crate::db::migrate(&db).await?;
        tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");

        let redis_client = redis::Client::open(config.redis_url.as_str())?;
        let redis = ConnectionManager::new(redis_client).await?;
        tracing::info!("✅ Redis Connection Manager initialized (pooled)");

        let verifier = UserInfoVerifier::new(config.identity_userinfo_url.clone(), config.store_timeout)?;

        let sessions: Arc<dyn SessionStore> = Arc::new(RedisSessionStore::new(redis));
        let authority = SessionAuthority::new(
            sessions.clone(),
            Arc::new(PgUserStore::new(db.clone())),
            Arc::new(verifier),
            config.session_salt.clone(),
            config.session_duration(),
            config.store_timeout,
        );

        let cache = build_cache(config);
        tracing::info!("✅ Response cache initialized (ttl {:?})", config.cache_ttl);

        Ok(AppState {
            authority: Arc::new(authority),
            sessions,
            api_keys: Arc::new(PgApiKeyStore::new(db)),
            cache,
            config: config.clone(),
        })
    }

    /// State backed by in-memory stores and the given verifier.
    pub fn in_memory(config: Config, verifier: Arc<dyn AccessTokenVerifier>) -> Self {
        Self::with_users(config, verifier, InMemoryUserStore::new())
    }

    /// Like [`AppState::in_memory`], with a pre-seeded user store.
    pub fn with_users(config: Config, verifier: Arc<dyn AccessTokenVerifier>, users: InMemoryUserStore) -> Self {
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let authority = SessionAuthority::new(
            sessions.clone(),
            Arc::new(users),
            verifier,
            config.session_salt.clone(),
            config.session_duration(),
            config.store_timeout,
        );

        AppState {
            authority: Arc::new(authority),
            sessions,
            api_keys: Arc::new(InMemoryApiKeyStore::new()),
            cache: build_cache(&config),
            config,
        }
    }
}
