use anyhow::Context;
use market_data::{BinanceClient, CandlestickRenderer, QuoteFeed};
use signal_api::analysis::Analyzer;
use signal_api::config::Settings;
use signal_api::db::{init_db, run_migrations};
use signal_api::oracle::GeminiClient;
use signal_api::tracker::SignalTracker;
use signal_api::{observability, AppState, JwtKeys, MetricsCollector, PgSignalStore, SignalStore, StrategyRegistry};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    observability::init_logging();

    info!("Starting Signal API...");
    let settings = Settings::load().context("invalid configuration")?;

    info!("Connecting to database...");
    let db = init_db(&settings.database.url, settings.database.max_connections).await?;
    info!("Database connected");

    info!("Running migrations...");
    run_migrations(&db).await?;
    info!("Migrations applied");

    let strategies = StrategyRegistry::load(&settings.strategies.file)
        .with_context(|| format!("loading {}", settings.strategies.file.display()))?;
    if strategies.is_empty() {
        warn!("No strategies configured, every analysis request will be rejected");
    }

    let binance = Arc::new(BinanceClient::new(settings.market.base_url.clone())?);
    let quotes: Arc<dyn QuoteFeed> = binance.clone();
    let renderer = Arc::new(CandlestickRenderer::new(binance, settings.charts.dir.clone()));
    let oracle = Arc::new(GeminiClient::new(settings.oracle.gemini())?);
    let metrics = MetricsCollector::new();

    let analyzer = Arc::new(Analyzer::new(
        renderer,
        oracle,
        quotes.clone(),
        settings.analysis.analysis_config(),
        metrics.clone(),
    ));

    // Tracker gets its own pool so request load cannot starve it
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tracker = if settings.tracker.enabled {
        let tracker_db = init_db(&settings.database.url, settings.tracker.max_connections).await?;
        let tracker = SignalTracker::new(
            Arc::new(PgSignalStore::new(tracker_db)),
            quotes.clone(),
            settings.tracker.poll_interval(),
            metrics.clone(),
        );
        Some(tokio::spawn(tracker.run(shutdown_rx)))
    } else {
        warn!("Signal tracker disabled on this instance");
        None
    };

    let store: Arc<dyn SignalStore> = Arc::new(PgSignalStore::new(db.clone()));
    let state = Arc::new(AppState {
        db,
        store,
        analyzer,
        strategies: Arc::new(strategies),
        quotes,
        jwt: JwtKeys::new(&settings.auth.jwt_secret, settings.auth.token_ttl_hours),
        metrics,
    });

    let app = signal_api::app(state);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Signal API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Tracker finishes its current cycle before exiting
    let _ = shutdown_tx.send(true);
    if let Some(handle) = tracker {
        if let Err(e) = handle.await {
            error!("Signal tracker task failed: {}", e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
