//! Status and health check handlers.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::api::ApiState;
use crate::auth::Scope;

/// Health response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Service status.
    pub status: String,

    /// Crate version.
    pub version: String,

    /// Blog the catalog is read from.
    pub blog_id: String,

    /// A content credential is held locally.
    pub content_signed_in: bool,

    /// An asset credential is held locally.
    pub asset_signed_in: bool,
}

/// Health check endpoint. Local state only, no remote calls.
pub async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        blog_id: state.config.blog_id.clone(),
        content_signed_in: state.vault.has(Scope::Content),
        asset_signed_in: state.vault.has(Scope::Asset),
    })
}
