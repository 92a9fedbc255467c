use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use zeroize::Zeroizing;

/// Minimum length of the signature salt.
pub const MIN_SALT_LEN: usize = 16;

/// Token bucket applied to sign-in attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimit {
    /// Seconds to replenish one request.
    pub replenish_secs: u64,
    pub burst: u32,
}

/// Peers allowed to report the client address in `X-Forwarded-For`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedProxies(Arc<[IpAddr]>);

impl TrustedProxies {
    pub fn new<I: IntoIterator<Item = IpAddr>>(peers: I) -> Self {
        Self(peers.into_iter().collect())
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.0.contains(ip)
    }

    /// Parses a comma-separated list of addresses.
    pub fn parse(raw: &str) -> Result<Self> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<IpAddr>().with_context(|| format!("Invalid TRUSTED_PROXIES entry {:?}", s)))
            .collect::<Result<Vec<_>>>()
            .map(Self::new)
    }
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// The URL of the Redis server.
    pub redis_url: String,
    /// Mixed into every session signature.
    pub session_salt: Zeroizing<String>,
    /// The duration of a session in days.
    pub session_duration_days: i64,
    /// The identity provider's user-info endpoint.
    pub identity_userinfo_url: String,
    pub listen_addr: SocketAddr,
    /// How long a cached response is served without revalidation.
    pub cache_ttl: Duration,
    pub cache_sweep_interval: Duration,
    /// Cached responses older than this are evicted by the sweeper.
    pub cache_max_age: Duration,
    /// Deadline for each store or identity provider call.
    pub store_timeout: Duration,
    pub authorize_rate_limit: Option<RateLimit>,
    /// Empty unless the service runs behind a reverse proxy.
    pub trusted_proxies: TrustedProxies,
    /// `production` turns on `Secure` cookies.
    pub app_env: String,
}

fn positive_secs(name: &str, default: u64) -> Result<Duration> {
    let secs: u64 = var_or(name, default)?;
    if secs == 0 {
        anyhow::bail!("{} must be positive", name);
    }
    Ok(Duration::from_secs(secs))
}

fn var_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", name)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Creates a new `Config` from environment variables.
    pub fn from_env() -> Result<Self> {
        let session_salt = Zeroizing::new(
            env::var("SESSION_SALT").context("SESSION_SALT must be set (generate with: openssl rand -hex 32)")?,
        );
        if session_salt.chars().count() < MIN_SALT_LEN {
            anyhow::bail!("SESSION_SALT must be at least {} characters", MIN_SALT_LEN);
        }

        let session_duration_days: i64 = var_or("SESSION_DURATION_DAYS", 7)?;
        if session_duration_days <= 0 {
            anyhow::bail!("SESSION_DURATION_DAYS must be positive");
        }

        let authorize_rate_limit = match env::var("AUTHORIZE_RATE_LIMIT_BURST") {
            Ok(_) => Some(RateLimit {
                burst: var_or("AUTHORIZE_RATE_LIMIT_BURST", 5)?,
                replenish_secs: var_or("AUTHORIZE_RATE_LIMIT_REPLENISH_SECS", 12)?,
            }),
            Err(_) => None,
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            session_salt,
            session_duration_days,
            identity_userinfo_url: env::var("IDENTITY_USERINFO_URL")
                .context("IDENTITY_USERINFO_URL must be set")?,
            listen_addr: var_or("LISTEN_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000)))?,
            cache_ttl: positive_secs("CACHE_TTL_SECS", 300)?,
            cache_sweep_interval: positive_secs("CACHE_SWEEP_INTERVAL_SECS", 60)?,
            cache_max_age: positive_secs("CACHE_MAX_AGE_SECS", 3600)?,
            store_timeout: Duration::from_millis(var_or("STORE_TIMEOUT_MS", 5000)?),
            authorize_rate_limit,
            trusted_proxies: TrustedProxies::parse(&env::var("TRUSTED_PROXIES").unwrap_or_default())?,
            app_env: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        })
    }

    /// Configuration for in-process use (tests, local tooling): no external
    /// services and no rate limiting.
    pub fn for_tests(session_salt: &str) -> Self {
        Self {
            database_url: String::new(),
            redis_url: String::new(),
            session_salt: Zeroizing::new(session_salt.to_string()),
            session_duration_days: 7,
            identity_userinfo_url: String::new(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            cache_ttl: Duration::from_secs(300),
            cache_sweep_interval: Duration::from_secs(60),
            cache_max_age: Duration::from_secs(3600),
            store_timeout: Duration::from_secs(5),
            authorize_rate_limit: None,
            trusted_proxies: TrustedProxies::default(),
            app_env: "test".to_string(),
        }
    }

    pub fn session_duration(&self) -> chrono::Duration {
        chrono::Duration::days(self.session_duration_days)
    }

    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }
}
