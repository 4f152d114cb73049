use std::sync::Arc;
use tracing::{error, info};

use recent_chats::{
    config::Config,
    log::MessageLog,
    server::{self, AppState},
    store::Store,
    PreviewAggregator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before the subscriber so RUST_LOG can come from it
    let dotenv = dotenvy::dotenv();

    // Initialize logging with default filter if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(e) = dotenv {
        // Not fatal if .env doesn't exist
        info!("No .env file found or failed to load: {}", e);
    }

    info!("recent-chats starting...");

    let config = Config::from_env()?;

    info!("Initializing store at {}", config.database_path.display());
    let store = Arc::new(Store::new(&config.database_path).await?);
    store.init().await?;

    let aggregator = PreviewAggregator::new(store.clone() as Arc<dyn MessageLog>)
        .with_max_in_flight(config.max_in_flight)
        .with_fetch_timeout(config.fetch_timeout);

    let app = server::router(Arc::new(AppState {
        aggregator,
        graph: store,
    }));

    info!(
        max_in_flight = config.max_in_flight,
        fetch_timeout = ?config.fetch_timeout,
        "Starting HTTP server on {}",
        config.bind_addr
    );
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                error!("Server stopped with error: {}", e);
            }
        }
    }

    Ok(())
}
