use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use crate::error::{AppError, Result};
use std::time::Duration;

/// Schema for the account and API key tables. Safe to apply repeatedly.
const SCHEMA: &str = include_str!("../migrations/0001_users_api_keys.sql");

/// Creates a new database connection pool.
///
/// # Arguments
///
/// * `database_url` - The URL of the PostgreSQL database.
/// * `max_size` - The maximum number of pooled connections.
/// * `timeout` - Deadline for acquiring and creating connections.
///
/// # Returns
///
/// A `Result` containing the `Pool`.
pub fn create_pool(database_url: &str, max_size: usize, timeout: Duration) -> Result<Pool> {
    let mut cfg = Config::new();
    let pg_config: tokio_postgres::Config = database_url.parse()?;

    if let Some(host) = pg_config.get_hosts().first() {
        match host {
            tokio_postgres::config::Host::Tcp(hostname) => cfg.host = Some(hostname.clone()),
            #[cfg(unix)]
            tokio_postgres::config::Host::Unix(path) => {
                cfg.host = Some(path.to_string_lossy().to_string())
            }
        }
    }

    if let Some(port) = pg_config.get_ports().first() {
        cfg.port = Some(*port);
    }

    if let Some(dbname) = pg_config.get_dbname() {
        cfg.dbname = Some(dbname.to_string());
    }

    if let Some(user) = pg_config.get_user() {
        cfg.user = Some(user.to_string());
    }

    if let Some(password) = pg_config.get_password() {
        cfg.password = Some(String::from_utf8_lossy(password).to_string());
    }

    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    cfg.pool = Some(PoolConfig {
        max_size,
        timeouts: deadpool_postgres::Timeouts {
            wait: Some(timeout),
            create: Some(timeout),
            recycle: Some(Duration::from_secs(1)),
        },
        ..PoolConfig::default()
    });

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(AppError::from)
}

/// Applies the schema.
pub async fn migrate(pool: &Pool) -> Result<()> {
    let client = pool.get().await?;
    client.batch_execute(SCHEMA).await?;
    tracing::info!("✅ Database schema is up to date");
    Ok(())
}
