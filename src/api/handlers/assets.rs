//! Asset hosting and book shelf handlers.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;

use super::{host_error, session_error, ApiError};
use crate::api::ApiState;
use crate::gateway::{AssetRecord, PublicLinks};
use crate::hosting::check_asset_size;

/// Hosted asset response.
#[derive(Serialize)]
pub struct HostedAsset {
    /// Public URL of the asset.
    pub url: String,
}

/// Host the request body and return its public URL.
///
/// The body's `Content-Type` is used for the data URI. Bodies above
/// [`crate::hosting::MAX_ASSET_BYTES`] are refused with 413.
pub async fn host_asset(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<HostedAsset>, ApiError> {
    if body.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "empty asset body".to_string()));
    }
    check_asset_size(body.len()).map_err(host_error)?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");

    let cancel = state.shutdown.child_token();
    let url = state
        .asset_host()
        .host(&body, content_type, &cancel)
        .await
        .map_err(host_error)?;

    Ok(Json(HostedAsset {
        url: url.to_string(),
    }))
}

/// List book files.
pub async fn list_books(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<AssetRecord>>, ApiError> {
    let books = state.shelf().list().await.map_err(session_error)?;
    Ok(Json(books))
}

/// Share a book file publicly.
pub async fn publish_book(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<PublicLinks>, ApiError> {
    let links = state.shelf().publish(&id).await.map_err(session_error)?;
    Ok(Json(links))
}

/// Delete a book file.
pub async fn remove_book(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.shelf().remove(&id).await.map_err(session_error)?;
    Ok(StatusCode::NO_CONTENT)
}
