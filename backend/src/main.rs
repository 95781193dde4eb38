use std::sync::Arc;

use backend::{
    api::{self, AppState},
    auction::broker::Broker,
    config::AppConfig,
    logger::init_tracing,
    registry::Registry,
    store::{KvStore, MemoryStore, SqliteKvStore},
};

/// Connects the configured store, running the schema migration on the way.
/// Without a `DATABASE_URL` the broker keeps everything in memory, which is
/// fine for development but loses the log on restart.
async fn init_store(cfg: &AppConfig) -> anyhow::Result<Arc<dyn KvStore>> {
    match &cfg.database_url {
        Some(url) => {
            sqlx::any::install_default_drivers();
            let store = SqliteKvStore::connect(url).await?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL unset; running on the in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    tracing::info!("Starting auction broker backend...");

    let cfg = AppConfig::from_env();
    if cfg.admin_token.is_empty() {
        tracing::warn!("ADMIN_TOKEN unset; admin endpoints will reject every request");
    }

    let store = init_store(&cfg).await?;
    let broker = Broker::spawn(store.clone(), &cfg);
    let registry = Arc::new(Registry::new(store.clone(), cfg.start_bal));

    let bind_addr = cfg.bind_addr.clone();
    let state = AppState {
        cfg: Arc::new(cfg),
        registry,
        broker,
        store,
    };

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "HTTP listener started");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
