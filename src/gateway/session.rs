//! Gateways bound to the vault that authorizes them.
//!
//! Every call goes through [`bounded`] with the configured timeout, and a
//! rejected credential is discarded from the vault on the spot. The next
//! `credential()` call will then run the grant flow again.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tracing::warn;

use super::{
    bounded, AssetGateway, AssetMetadata, AssetRecord, ContentGateway, ContentRecord,
    DesiredRecord, GatewayError, ListFilter, PublicLinks,
};
use crate::auth::{AuthError, Credential, Scope, Vault};

/// Failure of an operation that needs a credential and at least one remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("operation cancelled")]
    Cancelled,
}

/// A gateway, the vault holding its credential, and a per-call time limit.
pub struct Session<G: ?Sized> {
    gateway: Arc<G>,
    vault: Arc<Vault>,
    scope: Scope,
    timeout: Duration,
}

impl<G: ?Sized> Clone for Session<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            vault: Arc::clone(&self.vault),
            scope: self.scope,
            timeout: self.timeout,
        }
    }
}

pub type ContentSession = Session<dyn ContentGateway>;
pub type AssetSession = Session<dyn AssetGateway>;

impl<G: ?Sized> Session<G> {
    pub fn vault(&self) -> &Arc<Vault> {
        &self.vault
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Current credential for this session's scope, acquiring one if needed.
    pub async fn credential(&self) -> Result<Credential, AuthError> {
        self.vault.acquire(self.scope).await
    }

    fn observe<T>(&self, result: Result<T, GatewayError>) -> Result<T, GatewayError> {
        if let Err(error) = &result {
            if error.is_auth() {
                warn!(scope = %self.scope, error = %error, "Remote rejected credential, discarding it");
                self.vault.discard(self.scope);
            }
        }
        result
    }
}

impl ContentSession {
    pub fn content(gateway: Arc<dyn ContentGateway>, vault: Arc<Vault>, timeout: Duration) -> Self {
        Self {
            gateway,
            vault,
            scope: Scope::Content,
            timeout,
        }
    }

    pub async fn list(
        &self,
        credential: &Credential,
        filter: &ListFilter,
    ) -> Result<Vec<ContentRecord>, GatewayError> {
        self.observe(bounded(self.timeout, self.gateway.list(credential, filter)).await)
    }

    pub async fn get(&self, credential: &Credential, id: &str) -> Result<ContentRecord, GatewayError> {
        self.observe(bounded(self.timeout, self.gateway.get(credential, id)).await)
    }

    pub async fn search(
        &self,
        credential: &Credential,
        query: &str,
    ) -> Result<Vec<ContentRecord>, GatewayError> {
        self.observe(bounded(self.timeout, self.gateway.search(credential, query)).await)
    }

    pub async fn create(
        &self,
        credential: &Credential,
        record: &DesiredRecord,
        draft: bool,
    ) -> Result<ContentRecord, GatewayError> {
        self.observe(bounded(self.timeout, self.gateway.create(credential, record, draft)).await)
    }

    pub async fn update(
        &self,
        credential: &Credential,
        id: &str,
        record: &DesiredRecord,
    ) -> Result<ContentRecord, GatewayError> {
        self.observe(bounded(self.timeout, self.gateway.update(credential, id, record)).await)
    }

    pub async fn delete(&self, credential: &Credential, id: &str) -> Result<(), GatewayError> {
        self.observe(bounded(self.timeout, self.gateway.delete(credential, id)).await)
    }

    /// Fetch the whole catalog with a freshly acquired credential.
    pub async fn catalog(&self) -> Result<Vec<ContentRecord>, SessionError> {
        let credential = self.credential().await?;
        Ok(self.list(&credential, &ListFilter::default()).await?)
    }
}

impl AssetSession {
    pub fn assets(gateway: Arc<dyn AssetGateway>, vault: Arc<Vault>, timeout: Duration) -> Self {
        Self {
            gateway,
            vault,
            scope: Scope::Asset,
            timeout,
        }
    }

    pub async fn upload(
        &self,
        credential: &Credential,
        data: Bytes,
        metadata: &AssetMetadata,
    ) -> Result<AssetRecord, GatewayError> {
        self.observe(bounded(self.timeout, self.gateway.upload(credential, data, metadata)).await)
    }

    pub async fn list(
        &self,
        credential: &Credential,
        query: Option<&str>,
    ) -> Result<Vec<AssetRecord>, GatewayError> {
        self.observe(bounded(self.timeout, self.gateway.list(credential, query)).await)
    }

    pub async fn set_public(
        &self,
        credential: &Credential,
        id: &str,
    ) -> Result<PublicLinks, GatewayError> {
        self.observe(bounded(self.timeout, self.gateway.set_public(credential, id)).await)
    }

    pub async fn delete(&self, credential: &Credential, id: &str) -> Result<(), GatewayError> {
        self.observe(bounded(self.timeout, self.gateway.delete(credential, id)).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticGrant;
    use crate::gateway::memory::MemoryContentStore;

    #[tokio::test]
    async fn test_rejected_credential_is_discarded() {
        let vault = Arc::new(Vault::ephemeral(
            Arc::new(StaticGrant::new("content-token")),
            Arc::new(StaticGrant::new("asset-token")),
        ));
        let store = Arc::new(MemoryContentStore::new());
        let session = ContentSession::content(store.clone(), vault.clone(), Duration::from_secs(1));

        let credential = session.credential().await.unwrap();
        assert!(vault.has(Scope::Content));

        store.reject_credentials(true);
        let result = session.list(&credential, &ListFilter::default()).await;
        assert!(matches!(result, Err(GatewayError::Auth { .. })));
        assert!(!vault.has(Scope::Content));
        // the other scope is untouched
        assert!(!vault.has(Scope::Asset));
    }
}
