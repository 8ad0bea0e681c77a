//! Analysis handlers

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use market_data::{normalize_pair, ChartArtifact};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::analysis::outcome::{new_signal, ChartPayload};
use crate::analysis::{Outcome, OutcomePayload, SuccessPayload};
use crate::error::ApiError;
use crate::middleware::AuthContext;
use crate::models::{ActiveAnalysesResponse, AnalyzeRequest};
use crate::observability::metrics;
use crate::AppState;

/// POST /analyze - Run a consensus analysis and persist a successful signal
pub async fn analyze(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Response, ApiError> {
    req.validate()?;

    let symbol = normalize_pair(&req.pair);
    let strategy = state
        .strategies
        .get(&req.strategy_key)
        .ok_or_else(|| ApiError::UnknownStrategy(req.strategy_key.clone()))?;

    info!(
        user = %auth.username,
        symbol = %symbol,
        strategy = %strategy.key,
        "Analysis requested"
    );

    // Analysis and persistence finish even if the client disconnects
    let task_state = state.clone();
    let owner_id = auth.user_id;
    let (status, payload) = tokio::spawn(async move {
        let outcome = task_state
            .analyzer
            .run_analysis(&symbol, &strategy)
            .await?;
        Ok::<_, ApiError>(settle(&task_state, owner_id, &strategy.key, outcome).await)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("analysis task failed: {}", e)))??;

    Ok((status, Json(payload)).into_response())
}

/// Turn an outcome into the response body, saving a successful signal
async fn settle(
    state: &AppState,
    owner_id: Uuid,
    strategy_key: &str,
    outcome: Outcome,
) -> (StatusCode, OutcomePayload) {
    let (idea, consensus, charts) = match outcome {
        Outcome::NoSignal { reason } => return (StatusCode::OK, OutcomePayload::no_signal(&reason)),
        Outcome::Ambiguous { tally } => return (StatusCode::OK, OutcomePayload::ambiguous(&tally)),
        Outcome::Success {
            idea,
            consensus,
            charts,
        } => (idea, consensus, charts),
    };

    let mut payload = SuccessPayload::new(&idea, &consensus, embed_charts(&charts).await);
    // Chart files are removed here
    drop(charts);

    let signal = new_signal(owner_id, strategy_key, &idea, &consensus);
    match state.store.insert(&signal).await {
        Ok(saved) => {
            state.metrics.increment(metrics::SIGNALS_PERSISTED, 1).await;
            info!(signal_id = saved.id, symbol = %saved.symbol, "Signal saved");
            payload.signal_id = Some(saved.id);
            (StatusCode::OK, OutcomePayload::Success(payload))
        }
        Err(e) => {
            state.metrics.increment(metrics::SIGNAL_PERSIST_ERRORS, 1).await;
            error!(symbol = %signal.symbol, "Failed to save signal: {}", e);
            payload.detail = Some("Signal generated but could not be saved".to_string());
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                OutcomePayload::Success(payload),
            )
        }
    }
}

/// GET /analyses/active - Number of analyses currently running
pub async fn active_analyses(State(state): State<Arc<AppState>>) -> Json<ActiveAnalysesResponse> {
    Json(ActiveAnalysesResponse {
        active_count: state.analyzer.in_flight(),
    })
}

/// Base64 PNGs for the response; unreadable charts are left out
async fn embed_charts(charts: &[ChartArtifact]) -> Vec<ChartPayload> {
    let mut embedded = Vec::with_capacity(charts.len());
    for chart in charts {
        match chart.read_bytes().await {
            Ok(bytes) => embedded.push(ChartPayload {
                timeframe: chart.timeframe(),
                image_base64: BASE64.encode(bytes),
            }),
            Err(e) => warn!(path = %chart.path().display(), "Chart not embedded: {}", e),
        }
    }
    embedded
}
