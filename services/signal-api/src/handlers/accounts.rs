//! Registration and login

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{hash_password, verify_password};
use crate::error::ApiError;
use crate::models::{LoginRequest, RegisterRequest, TokenResponse, User};
use crate::AppState;

/// POST /register - Create an account
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(mut req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    // Length limits apply to the stored form
    req.username = req.username.trim().to_string();
    req.validate()?;

    let password_hash = hash_password(&req.password)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (id, username, password_hash) VALUES ($1, $2, $3) \
         RETURNING id, username, password_hash, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(&req.username)
    .bind(&password_hash)
    .fetch_one(&state.db)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ApiError::Conflict("Username already registered".to_string())
        }
        other => other.into(),
    })?;

    info!(user_id = %user.id, username = %user.username, "User registered");
    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /login - Exchange credentials for an access token
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let rejected = || ApiError::Unauthorized("Incorrect username or password".to_string());

    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, password_hash, created_at FROM users WHERE username = $1",
    )
    .bind(req.username.trim())
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(rejected)?;

    if !verify_password(&req.password, &user.password_hash).await {
        return Err(rejected());
    }

    let access_token = state
        .jwt
        .issue(user.id, &user.username)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
    }))
}
