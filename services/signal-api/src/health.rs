//! Health check endpoints for load balancers and monitoring

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::AppState;

/// Liveness: no external dependencies
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Readiness: verifies database connectivity
pub async fn readyz(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReadinessResponse>, StatusCode> {
    match sqlx::query("SELECT 1").fetch_one(&state.db).await {
        Ok(_) => Ok(Json(ReadinessResponse {
            status: "ready".to_string(),
            checks: vec![HealthCheck::new("database", "ok")],
        })),
        Err(e) => {
            tracing::error!("Readiness check failed: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// Component checks plus a metrics snapshot.
///
/// Only the database decides the status code; a struggling quote feed
/// reports `degraded` but the service keeps answering.
pub async fn health_detail(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<DetailedHealthResponse>) {
    let mut checks = Vec::with_capacity(2);

    let db_ok = sqlx::query("SELECT 1").fetch_one(&state.db).await.is_ok();
    checks.push(HealthCheck::new("database", if db_ok { "ok" } else { "error" }));

    let feed = state.quotes.health().await;
    checks.push(HealthCheck {
        name: format!("quotes:{}", feed.source),
        status: if feed.is_healthy { "ok" } else { "degraded" }.to_string(),
    });

    let metrics = state.metrics.snapshot().await;
    let status = match (db_ok, feed.is_healthy) {
        (true, true) => "healthy",
        (true, false) => "degraded",
        (false, _) => "unhealthy",
    };

    let response = DetailedHealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks,
        analyses_in_flight: state.analyzer.in_flight(),
        metrics: HealthMetrics {
            uptime_secs: metrics.uptime_secs,
            counters: metrics.counters,
            gauges: metrics.gauges,
        },
    };

    let code = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: Vec<HealthCheck>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DetailedHealthResponse {
    pub status: String,
    pub version: String,
    pub checks: Vec<HealthCheck>,
    pub analyses_in_flight: usize,
    pub metrics: HealthMetrics,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: String,
}

impl HealthCheck {
    fn new(name: &str, status: &str) -> Self {
        Self {
            name: name.to_string(),
            status: status.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub uptime_secs: u64,
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
}
