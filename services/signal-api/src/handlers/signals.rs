use axum::{
    extract::{Extension, State},
    Json,
};
use std::sync::Arc;

use crate::error::ApiError;
use crate::middleware::AuthContext;
use crate::models::{Signal, StrategySummary};
use crate::AppState;

/// GET /history - Signals of the caller, newest first
pub async fn history(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<Signal>>, ApiError> {
    let signals = state.store.history(auth.user_id).await?;
    Ok(Json(signals))
}

/// GET /strategies - Configured strategies
pub async fn list_strategies(State(state): State<Arc<AppState>>) -> Json<Vec<StrategySummary>> {
    Json(
        state
            .strategies
            .list()
            .map(|s| StrategySummary {
                key: s.key.clone(),
                name: s.name.clone(),
                description: s.description.clone(),
                timeframes: s.timeframes.clone(),
            })
            .collect(),
    )
}
