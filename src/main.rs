use std::net::SocketAddr;
use std::time::Duration;

use halgate::{config::Config, routes, state::AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("🛑 Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let state = AppState::new(&config).await?;
    tracing::info!("✅ AppState initialized");

    let cache = state.cache.clone();
    let sweeper = cache.spawn_sweeper(config.cache_sweep_interval);

    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            tracing::info!("🧹 Pruning expired sessions...");
            match sessions.prune_expired().await {
                Ok(removed) => tracing::info!("✅ Pruned {} expired sessions", removed),
                Err(e) => tracing::error!("❌ Session pruning failed: {}", e),
            }
        }
    });

    let app = routes::app(state)?;

    tracing::info!("🚀 Server listening on http://{}", config.listen_addr);
    tracing::info!("✅ Background jobs started (cache sweep, hourly session pruning)");

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    cache.shutdown();
    sweeper.await?;
    tracing::info!("👋 Server stopped");

    Ok(())
}
