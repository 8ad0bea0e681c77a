//! Bearer-token authentication
//!
//! Validates HS256 access tokens and attaches the caller to the request.

use axum::{
    body::Body,
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::AppState;

/// Authenticated user context extracted from the token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub username: String,
}

/// Extracts `Authorization: Bearer <token>`, validates it and attaches the
/// `AuthContext` to the request extensions.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let unauthorized = || ApiError::Unauthorized("Could not validate credentials".to_string());

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(unauthorized)?;

    let claims = state.jwt.verify(token).map_err(|e| {
        tracing::debug!("JWT validation failed: {}", e);
        unauthorized()
    })?;

    request.extensions_mut().insert(AuthContext {
        user_id: claims.sub,
        username: claims.username,
    });

    Ok(next.run(request).await)
}
