mod bridge;
mod config;
mod db;
mod mqtt;
mod router;
mod store;
mod validator;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{bridge::Bridge, config::Config, mqtt::ConnectionManager, store::Store};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent — env vars may be set externally)
    let _ = dotenvy::dotenv();

    // Initialise tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    // Load config
    let config = Config::from_env()?;

    // Connect to DB and run migrations; failure here is fatal (non-zero exit)
    let pool = db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("failed to initialize database pool")?;
    db::run_migrations(&pool).await?;
    info!("Database ready");

    // Compose the bridge: store → pipeline → broker session
    let store = Store::new(pool.clone());
    let bridge = Bridge::new(store, config.rules.clone());
    let manager = ConnectionManager::new(&config.mqtt, bridge);

    // Run until shutdown signal or exhausted reconnect budget. The pool is
    // released on both paths before the process exits.
    let result = manager.run(shutdown_signal()).await;
    pool.close().await;

    result?;
    info!("MQTT bridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
