//! Catalog handlers: validate, import, export, search and stats.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use super::{session_error, sync_error, ApiError};
use crate::api::ApiState;
use crate::export::{export_catalog, ExportDocument};
use crate::reconcile::{validate, ReconcilePolicy, ReconciliationReport, ValidationResult};
use crate::search::{search_posts, SearchResults};
use crate::stats::{catalog_stats, CatalogStats};

/// Check an import document without touching the remote.
pub async fn validate_posts(Json(document): Json<Value>) -> Json<ValidationResult> {
    Json(validate(&document))
}

/// Sync an import document into the catalog.
///
/// The policy comes from the query string, e.g. `?updateExisting=true`.
pub async fn import_posts(
    State(state): State<Arc<ApiState>>,
    Query(policy): Query<ReconcilePolicy>,
    Json(document): Json<Value>,
) -> Result<Json<ReconciliationReport>, ApiError> {
    let cancel = state.shutdown.child_token();
    let report = state
        .reconciler()
        .import(&document, policy, &cancel)
        .await
        .map_err(sync_error)?;

    Ok(Json(report))
}

/// Export query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    /// Comma-separated post ids. All posts when absent.
    pub ids: Option<String>,
}

impl ExportQuery {
    fn ids(&self) -> Option<Vec<String>> {
        self.ids.as_deref().map(|ids| {
            ids.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

/// Export all or selected posts.
pub async fn export_posts(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ExportQuery>,
) -> Result<Json<ExportDocument>, ApiError> {
    let ids = query.ids();
    let document = export_catalog(&state.content, ids.as_deref())
        .await
        .map_err(session_error)?;

    Ok(Json(document))
}

/// Search query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    /// Search text. Every post when blank.
    #[serde(default)]
    pub q: String,
}

/// Search posts by title and body.
pub async fn search(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResults>, ApiError> {
    let results = search_posts(&state.content, &query.q)
        .await
        .map_err(session_error)?;
    Ok(Json(results))
}

/// Catalog statistics.
pub async fn post_stats(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<CatalogStats>, ApiError> {
    let stats = catalog_stats(&state.content).await.map_err(session_error)?;
    Ok(Json(stats))
}
