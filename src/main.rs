use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use auction_watch::api::{router, ApiState, HealthState, LatencyStats};
use auction_watch::auth::{ClientCredentials, TokenManager};
use auction_watch::config::Config;
use auction_watch::db::SqliteStore;
use auction_watch::error::Result;
use auction_watch::fetcher::ListingFetcher;
use auction_watch::notify::TelegramSink;
use auction_watch::scheduler::{PollDeps, PollScheduler, PollSettings};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let store = SqliteStore::connect(&cfg.db_path).await?;
    let (active_filters, watched_items) = store.active_summary().await?;
    info!(active_filters, watched_items, "Loaded watch filters");

    // --- Upstream clients ---
    let tokens = Arc::new(TokenManager::new(Arc::new(ClientCredentials::new(&cfg)?)));
    let source = Arc::new(ListingFetcher::new(&cfg)?);
    let sink = Arc::new(TelegramSink::new(&cfg)?);

    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());

    // Poll loop (background, runs until shutdown)
    let store_handle = Arc::new(store.clone());
    let scheduler = PollScheduler::new(
        PollSettings::from_config(&cfg),
        PollDeps {
            filters: store_handle.clone(),
            ledger: store_handle.clone(),
            users: store_handle,
            source,
            tokens: Arc::clone(&tokens),
            sink,
            health: Arc::clone(&health),
            latency: Arc::clone(&latency),
        },
    );
    tokio::spawn(async move { scheduler.run().await });

    // HTTP API server
    let api_state = ApiState {
        health,
        latency,
        tokens,
        store,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
