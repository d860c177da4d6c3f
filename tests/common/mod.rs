//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use shelfsync::auth::{StaticGrant, Vault};
use shelfsync::gateway::{AssetGateway, AssetSession, ContentGateway, ContentSession};
use shelfsync::reconcile::Reconciler;
use shelfsync::SyncConfig;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Vault with static tokens for both scopes, kept in memory.
pub fn vault() -> Arc<Vault> {
    Arc::new(Vault::ephemeral(
        Arc::new(StaticGrant::new("content-token")),
        Arc::new(StaticGrant::new("asset-token")),
    ))
}

pub fn content_session(gateway: Arc<dyn ContentGateway>, vault: &Arc<Vault>) -> ContentSession {
    ContentSession::content(gateway, vault.clone(), TIMEOUT)
}

pub fn asset_session(gateway: Arc<dyn AssetGateway>, vault: &Arc<Vault>) -> AssetSession {
    AssetSession::assets(gateway, vault.clone(), TIMEOUT)
}

/// Reconciler without inter-write delay.
pub fn reconciler(gateway: Arc<dyn ContentGateway>) -> Reconciler {
    Reconciler::new(content_session(gateway, &vault()), &SyncConfig::new("blog-1"))
        .with_write_delay(Duration::ZERO)
}
