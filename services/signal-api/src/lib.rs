pub mod analysis;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod oracle;
pub mod retry;
pub mod store;
pub mod strategy;
pub mod tracker;
pub mod handlers {
    pub mod accounts;
    pub mod analysis;
    pub mod signals;
}

use axum::{
    routing::{get, post},
    Router,
};
use market_data::QuoteFeed;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use analysis::Analyzer;
pub use auth::JwtKeys;
pub use db::Db;
pub use error::ApiError;
pub use models::*;
pub use observability::{Logger, MetricsCollector};
pub use store::{PgSignalStore, SignalStore};
pub use strategy::StrategyRegistry;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub store: Arc<dyn SignalStore>,
    pub analyzer: Arc<Analyzer>,
    pub strategies: Arc<StrategyRegistry>,
    pub quotes: Arc<dyn QuoteFeed>,
    pub jwt: JwtKeys,
    pub metrics: MetricsCollector,
}

/// Build the API router
pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Routes that need a bearer token
    let user_routes = Router::new()
        .route("/analyze", post(handlers::analysis::analyze))
        .route("/history", get(handlers::signals::history))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ))
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/register", post(handlers::accounts::register))
        .route("/login", post(handlers::accounts::login))
        .route("/strategies", get(handlers::signals::list_strategies))
        .route("/analyses/active", get(handlers::analysis::active_analyses))
        .with_state(state.clone());

    let health_routes = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/health", get(health::health_detail))
        .with_state(state);

    Router::new()
        .nest("/v1", user_routes.merge(public_routes))
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
