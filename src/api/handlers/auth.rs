//! Sign-in and sign-out handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{auth_error, ApiError};
use crate::api::ApiState;
use crate::auth::Scope;

/// Sign-in response. Never carries the token.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInResponse {
    pub scope: Scope,
    pub acquired_at: DateTime<Utc>,
}

fn parse_scope(scope: &str) -> Result<Scope, ApiError> {
    scope.parse().map_err(|e: String| (StatusCode::BAD_REQUEST, e))
}

/// Acquire a credential for the scope, running its grant flow if needed.
pub async fn sign_in(
    State(state): State<Arc<ApiState>>,
    Path(scope): Path<String>,
) -> Result<Json<SignInResponse>, ApiError> {
    let scope = parse_scope(&scope)?;
    let credential = state.vault.acquire(scope).await.map_err(auth_error)?;

    Ok(Json(SignInResponse {
        scope: credential.scope,
        acquired_at: credential.acquired_at,
    }))
}

/// Sign out of the scope. Succeeds when not signed in.
pub async fn sign_out(
    State(state): State<Arc<ApiState>>,
    Path(scope): Path<String>,
) -> Result<StatusCode, ApiError> {
    let scope = parse_scope(&scope)?;
    state.vault.invalidate(scope).await;
    Ok(StatusCode::NO_CONTENT)
}
