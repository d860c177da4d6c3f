//! API request handlers.
//!
//! Failures are returned as `(StatusCode, String)`. Rejected credentials map
//! to 401, missing records to 404, oversized assets to 413, invalid
//! documents to 422, timeouts to 504 and other remote failures to 502.

pub mod assets;
pub mod auth;
pub mod posts;
pub mod status;

use axum::http::StatusCode;

use crate::auth::AuthError;
use crate::gateway::{GatewayError, SessionError};
use crate::hosting::HostError;
use crate::reconcile::SyncError;

/// Error half of every handler result.
pub type ApiError = (StatusCode, String);

fn gateway_status(error: &GatewayError) -> StatusCode {
    match error {
        GatewayError::Auth { .. } => StatusCode::UNAUTHORIZED,
        GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::Transport(_) | GatewayError::Remote { .. } => StatusCode::BAD_GATEWAY,
    }
}

fn auth_status(error: &AuthError) -> StatusCode {
    match error {
        AuthError::Denied { .. } => StatusCode::UNAUTHORIZED,
        AuthError::Transport { .. } => StatusCode::BAD_GATEWAY,
    }
}

pub(crate) fn auth_error(error: AuthError) -> ApiError {
    (auth_status(&error), error.to_string())
}

pub(crate) fn session_error(error: SessionError) -> ApiError {
    let status = match &error {
        SessionError::Auth(e) => auth_status(e),
        SessionError::Gateway(e) => gateway_status(e),
        SessionError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    };
    log_failure(status, &error);
    (status, error.to_string())
}

pub(crate) fn sync_error(error: SyncError) -> ApiError {
    let status = match &error {
        SyncError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SyncError::Auth(e) => auth_status(e),
        SyncError::Gateway(e) => gateway_status(e),
        SyncError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    };
    log_failure(status, &error);
    (status, error.to_string())
}

pub(crate) fn host_error(error: HostError) -> ApiError {
    let status = match &error {
        HostError::Auth(e) => auth_status(e),
        HostError::Gateway(e) => gateway_status(e),
        HostError::AssetExtractionFailed { .. } | HostError::CleanupFailed { .. } => {
            StatusCode::BAD_GATEWAY
        }
        HostError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        HostError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    };
    log_failure(status, &error);
    (status, error.to_string())
}

fn log_failure(status: StatusCode, error: &dyn std::error::Error) {
    if status.is_server_error() {
        tracing::error!(status = %status, error = %error, "Request failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Scope;
    use std::time::Duration;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            session_error(GatewayError::Auth { status: 403 }.into()).0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            session_error(GatewayError::NotFound("post 1".into()).into()).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            session_error(GatewayError::Timeout(Duration::from_secs(30)).into()).0,
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            sync_error(SyncError::Invalid(vec!["Post 1: title is required".into()])).0,
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            host_error(HostError::AssetExtractionFailed { id: "1".into() }).0,
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            host_error(HostError::TooLarge { size: 10, limit: 5 }).0,
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            sync_error(
                AuthError::Transport {
                    scope: Scope::Content,
                    reason: "offline".into()
                }
                .into()
            )
            .0,
            StatusCode::BAD_GATEWAY
        );
    }
}
