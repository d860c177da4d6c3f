//! REST API for the shelfsync daemon.
//!
//! Provides HTTP endpoints for:
//! - Import document validation and catalog sync
//! - Catalog export, search and statistics
//! - Asset hosting through the content API
//! - Book shelf listing and sharing
//! - Sign-in and sign-out per credential scope

pub mod handlers;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::Vault;
use crate::config::SyncConfig;
use crate::gateway::{AssetSession, ContentSession};
use crate::hosting::AssetHost;
use crate::reconcile::Reconciler;
use crate::shelf::BookShelf;

/// Largest request body accepted. Hosted assets have their own, lower limit.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Shared state for API handlers.
pub struct ApiState {
    /// Credentials for both scopes.
    pub vault: Arc<Vault>,

    /// Content API bound to the vault.
    pub content: ContentSession,

    /// File storage API bound to the vault.
    pub assets: AssetSession,

    pub config: SyncConfig,

    /// Cancelled on shutdown; running syncs stop between records.
    pub shutdown: CancellationToken,
}

impl ApiState {
    pub fn new(
        vault: Arc<Vault>,
        content: ContentSession,
        assets: AssetSession,
        config: SyncConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            vault,
            content,
            assets,
            config,
            shutdown,
        }
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.content.clone(), &self.config)
    }

    pub fn asset_host(&self) -> AssetHost {
        AssetHost::new(self.content.clone())
    }

    pub fn shelf(&self) -> BookShelf {
        BookShelf::new(self.assets.clone())
    }
}

/// Build the API router with all routes.
pub fn router(state: Arc<ApiState>) -> Router {
    // CORS configuration - allow requests from any origin for local front ends
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Status/health
        .route("/api/v1/status", get(handlers::status::health))
        // Posts
        .route("/api/v1/posts/validate", post(handlers::posts::validate_posts))
        .route("/api/v1/posts/import", post(handlers::posts::import_posts))
        .route("/api/v1/posts/export", get(handlers::posts::export_posts))
        .route("/api/v1/posts/search", get(handlers::posts::search))
        .route("/api/v1/posts/stats", get(handlers::posts::post_stats))
        // Assets
        .route("/api/v1/assets", post(handlers::assets::host_asset))
        .route("/api/v1/books", get(handlers::assets::list_books))
        .route("/api/v1/books/:id", delete(handlers::assets::remove_book))
        .route("/api/v1/books/:id/publish", post(handlers::assets::publish_book))
        // Credentials
        .route(
            "/api/v1/auth/:scope",
            post(handlers::auth::sign_in).delete(handlers::auth::sign_out),
        )
        // Middleware
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                // Only log requests/responses that are NOT successful
                .on_request(())
                .on_response(|response: &axum::http::Response<_>, latency: std::time::Duration, _span: &tracing::Span| {
                    let status = response.status();
                    if !status.is_success() {
                        tracing::warn!(
                            status = %status,
                            latency_ms = latency.as_millis(),
                            "request failed"
                        );
                    }
                })
        )
        .with_state(state)
}

/// Start the API server. Stops accepting requests once `shutdown` fires.
pub async fn serve(state: Arc<ApiState>, bind_addr: &str) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;

    tracing::info!("shelfsync API listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
