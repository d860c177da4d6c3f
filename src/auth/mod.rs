//! Credential vault for the two API scopes.
//!
//! The content scope and the asset scope each hold at most one live
//! credential. They differ in lifetime:
//!
//! - **Content**: persisted to the data directory, survives restarts, dropped
//!   on sign-out or when the content API answers 401/403.
//! - **Asset**: memory only, dropped on sign-out or process exit.
//!
//! Acquisition runs the scope's [`GrantFlow`]. Concurrent callers for the same
//! scope share a single pending grant instead of starting a second one.
//!
//! ```text
//!   Absent ──acquire──▶ Pending ──granted──▶ Valid
//!     ▲                   │                    │
//!     └────denied/failed──┘                    │
//!     └──────────────invalidate / 401/403──────┘
//! ```

pub mod grant;
pub mod store;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use grant::{DeviceCodeGrant, GrantFlow, OAuthEndpoints, StaticGrant};
pub use store::{CredentialStore, StoreError};

/// One of the two independent credential domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// The blog content API.
    Content,
    /// The file storage API.
    Asset,
}

impl Scope {
    pub const ALL: [Scope; 2] = [Scope::Content, Scope::Asset];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Content => "content",
            Scope::Asset => "asset",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "content" | "blog" => Ok(Scope::Content),
            "asset" | "assets" | "drive" => Ok(Scope::Asset),
            other => Err(format!("unknown scope '{}': expected content or asset", other)),
        }
    }
}

/// Auth errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("{scope} sign-in denied: {reason}")]
    Denied { scope: Scope, reason: String },

    #[error("{scope} sign-in could not start: {reason}")]
    Transport { scope: Scope, reason: String },
}

/// An access token for one scope.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub scope: Scope,
    token: String,
    pub acquired_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(scope: Scope, token: impl Into<String>) -> Self {
        Self {
            scope,
            token: token.into(),
            acquired_at: Utc::now(),
        }
    }

    /// The bearer token.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("scope", &self.scope)
            .field("token", &"<redacted>")
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

type PendingGrant = Shared<BoxFuture<'static, Result<Credential, AuthError>>>;

enum Slot {
    Absent,
    Pending { generation: u64, grant: PendingGrant },
    Valid(Credential),
}

struct ScopeState {
    slot: Slot,
    /// Bumped for every grant started so a stale grant cannot overwrite newer state.
    generation: u64,
}

struct ScopeVault {
    scope: Scope,
    flow: Arc<dyn GrantFlow>,
    store: Option<CredentialStore>,
    state: Mutex<ScopeState>,
}

impl ScopeVault {
    fn new(scope: Scope, flow: Arc<dyn GrantFlow>, store: Option<CredentialStore>) -> Self {
        let slot = match store.as_ref().map(CredentialStore::load) {
            Some(Ok(Some(credential))) if credential.scope == scope => {
                info!(scope = %scope, acquired_at = %credential.acquired_at, "Loaded persisted credential");
                Slot::Valid(credential)
            }
            Some(Err(e)) => {
                warn!(scope = %scope, error = %e, "Ignoring unreadable persisted credential");
                Slot::Absent
            }
            _ => Slot::Absent,
        };

        Self {
            scope,
            flow,
            store,
            state: Mutex::new(ScopeState {
                slot,
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn acquire(&self) -> Result<Credential, AuthError> {
        let (generation, grant) = {
            let mut state = self.lock();
            match &state.slot {
                Slot::Valid(credential) => return Ok(credential.clone()),
                Slot::Pending { generation, grant } => {
                    debug!(scope = %self.scope, "Joining pending sign-in");
                    (*generation, grant.clone())
                }
                Slot::Absent => {
                    state.generation += 1;
                    let generation = state.generation;
                    let flow = Arc::clone(&self.flow);
                    let scope = self.scope;
                    let grant = async move {
                        let token = flow.grant(scope).await?;
                        Ok(Credential::new(scope, token))
                    }
                    .boxed()
                    .shared();
                    state.slot = Slot::Pending {
                        generation,
                        grant: grant.clone(),
                    };
                    info!(scope = %self.scope, "Starting sign-in");
                    (generation, grant)
                }
            }
        };

        let outcome = grant.await;
        self.settle(generation, &outcome);
        outcome
    }

    /// Record the outcome of grant `generation` unless the slot moved on meanwhile.
    fn settle(&self, generation: u64, outcome: &Result<Credential, AuthError>) {
        let mut state = self.lock();
        let current = matches!(&state.slot, Slot::Pending { generation: g, .. } if *g == generation);
        if !current {
            return;
        }

        match outcome {
            Ok(credential) => {
                info!(scope = %self.scope, "Signed in");
                if let Some(store) = &self.store {
                    if let Err(e) = store.save(credential) {
                        warn!(scope = %self.scope, error = %e, "Failed to persist credential");
                    }
                }
                state.slot = Slot::Valid(credential.clone());
            }
            Err(e) => {
                warn!(scope = %self.scope, error = %e, "Sign-in failed");
                state.slot = Slot::Absent;
            }
        }
    }

    fn has(&self) -> bool {
        matches!(self.lock().slot, Slot::Valid(_))
    }

    /// Clear local state and return the credential that was live, if any.
    fn clear(&self) -> Option<Credential> {
        let previous = std::mem::replace(&mut self.lock().slot, Slot::Absent);
        if let Some(store) = &self.store {
            if let Err(e) = store.clear() {
                warn!(scope = %self.scope, error = %e, "Failed to remove persisted credential");
            }
        }
        match previous {
            Slot::Valid(credential) => Some(credential),
            _ => None,
        }
    }
}

/// Holds one credential per [`Scope`].
///
/// Passed explicitly to every consumer; there is no ambient token lookup.
pub struct Vault {
    content: ScopeVault,
    asset: ScopeVault,
}

impl Vault {
    /// Vault whose content credential is persisted in `store`.
    pub fn open(
        content_flow: Arc<dyn GrantFlow>,
        asset_flow: Arc<dyn GrantFlow>,
        store: CredentialStore,
    ) -> Self {
        Self {
            content: ScopeVault::new(Scope::Content, content_flow, Some(store)),
            asset: ScopeVault::new(Scope::Asset, asset_flow, None),
        }
    }

    /// Vault that keeps both credentials in memory only.
    pub fn ephemeral(content_flow: Arc<dyn GrantFlow>, asset_flow: Arc<dyn GrantFlow>) -> Self {
        Self {
            content: ScopeVault::new(Scope::Content, content_flow, None),
            asset: ScopeVault::new(Scope::Asset, asset_flow, None),
        }
    }

    fn scope(&self, scope: Scope) -> &ScopeVault {
        match scope {
            Scope::Content => &self.content,
            Scope::Asset => &self.asset,
        }
    }

    /// Return the live credential for `scope`, running its grant flow if there is none.
    ///
    /// A grant already in flight is joined, not restarted. Failures are
    /// returned as-is and never retried.
    pub async fn acquire(&self, scope: Scope) -> Result<Credential, AuthError> {
        self.scope(scope).acquire().await
    }

    /// Whether a credential for `scope` is held locally. No remote call.
    pub fn has(&self, scope: Scope) -> bool {
        self.scope(scope).has()
    }

    /// Sign out of `scope`: revoke remotely where supported, then forget locally.
    ///
    /// Succeeds when nothing is held. A failed revocation is logged only.
    pub async fn invalidate(&self, scope: Scope) {
        let vault = self.scope(scope);
        let previous = vault.clear();

        if let Some(credential) = previous {
            if vault.flow.revokes() {
                if let Err(e) = vault.flow.revoke(&credential).await {
                    warn!(scope = %scope, error = %e, "Remote revocation failed");
                }
            }
        }

        info!(scope = %scope, "Signed out");
    }

    /// Forget a credential the remote has rejected. No revocation round trip.
    pub fn discard(&self, scope: Scope) {
        if self.scope(scope).clear().is_some() {
            info!(scope = %scope, "Discarded rejected credential");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Grant flow that counts invocations and answers after a short delay.
    struct CountingGrant {
        grants: AtomicUsize,
        revocations: AtomicUsize,
        deny: bool,
    }

    impl CountingGrant {
        fn new(deny: bool) -> Arc<Self> {
            Arc::new(Self {
                grants: AtomicUsize::new(0),
                revocations: AtomicUsize::new(0),
                deny,
            })
        }
    }

    #[async_trait]
    impl GrantFlow for CountingGrant {
        async fn grant(&self, scope: Scope) -> Result<String, AuthError> {
            let n = self.grants.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.deny {
                return Err(AuthError::Denied {
                    scope,
                    reason: "user cancelled".into(),
                });
            }
            Ok(format!("{}-token-{}", scope, n))
        }

        fn revokes(&self) -> bool {
            true
        }

        async fn revoke(&self, _credential: &Credential) -> Result<(), AuthError> {
            self.revocations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_concurrent_acquire_runs_one_grant() {
        let flow = CountingGrant::new(false);
        let vault = Arc::new(Vault::ephemeral(flow.clone(), CountingGrant::new(false)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let vault = Arc::clone(&vault);
            handles.push(tokio::spawn(async move { vault.acquire(Scope::Content).await }));
        }

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap().unwrap().token().to_string());
        }

        assert_eq!(flow.grants.load(Ordering::SeqCst), 1);
        assert!(tokens.iter().all(|t| t == "content-token-1"));
        assert!(vault.has(Scope::Content));
    }

    #[tokio::test]
    async fn test_denied_grant_leaves_scope_absent() {
        let flow = CountingGrant::new(true);
        let vault = Vault::ephemeral(flow.clone(), CountingGrant::new(false));

        let err = vault.acquire(Scope::Content).await.unwrap_err();
        assert!(matches!(err, AuthError::Denied { scope: Scope::Content, .. }));
        assert!(!vault.has(Scope::Content));

        // a later call starts a fresh flow rather than replaying the failure
        let _ = vault.acquire(Scope::Content).await;
        assert_eq!(flow.grants.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_scopes_are_independent() {
        let content = CountingGrant::new(false);
        let asset = CountingGrant::new(false);
        let vault = Vault::ephemeral(content.clone(), asset.clone());

        vault.acquire(Scope::Asset).await.unwrap();
        assert!(vault.has(Scope::Asset));
        assert!(!vault.has(Scope::Content));
        assert_eq!(content.grants.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalidate_revokes_and_tolerates_absent() {
        let asset = CountingGrant::new(false);
        let vault = Vault::ephemeral(CountingGrant::new(false), asset.clone());

        // nothing held yet
        vault.invalidate(Scope::Asset).await;
        assert_eq!(asset.revocations.load(Ordering::SeqCst), 0);

        vault.acquire(Scope::Asset).await.unwrap();
        vault.invalidate(Scope::Asset).await;
        assert!(!vault.has(Scope::Asset));
        assert_eq!(asset.revocations.load(Ordering::SeqCst), 1);

        // acquiring again replaces rather than merging
        let second = vault.acquire(Scope::Asset).await.unwrap();
        assert_eq!(second.token(), "asset-token-2");
    }

    #[tokio::test]
    async fn test_discard_skips_revocation() {
        let content = CountingGrant::new(false);
        let vault = Vault::ephemeral(content.clone(), CountingGrant::new(false));

        vault.acquire(Scope::Content).await.unwrap();
        vault.discard(Scope::Content);
        assert!(!vault.has(Scope::Content));
        assert_eq!(content.revocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_content_credential_survives_restart() {
        let temp = TempDir::new().unwrap();
        let store = CredentialStore::in_dir(temp.path());

        {
            let vault = Vault::open(CountingGrant::new(false), CountingGrant::new(false), store.clone());
            vault.acquire(Scope::Content).await.unwrap();
            vault.acquire(Scope::Asset).await.unwrap();
        }

        let content = CountingGrant::new(false);
        let vault = Vault::open(content.clone(), CountingGrant::new(false), store.clone());
        assert!(vault.has(Scope::Content));
        assert!(!vault.has(Scope::Asset));
        assert_eq!(vault.acquire(Scope::Content).await.unwrap().token(), "content-token-1");
        assert_eq!(content.grants.load(Ordering::SeqCst), 0);

        vault.invalidate(Scope::Content).await;
        let reopened = Vault::open(CountingGrant::new(false), CountingGrant::new(false), store);
        assert!(!reopened.has(Scope::Content));
    }

    #[tokio::test]
    async fn test_invalidate_during_pending_grant_wins() {
        let flow = CountingGrant::new(false);
        let vault = Arc::new(Vault::ephemeral(flow, CountingGrant::new(false)));

        let pending = {
            let vault = Arc::clone(&vault);
            tokio::spawn(async move { vault.acquire(Scope::Content).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        vault.invalidate(Scope::Content).await;

        assert!(pending.await.unwrap().is_ok());
        assert!(!vault.has(Scope::Content));
    }

    #[test]
    fn test_scope_parsing() {
        assert_eq!("content".parse::<Scope>().unwrap(), Scope::Content);
        assert_eq!("Drive".parse::<Scope>().unwrap(), Scope::Asset);
        assert!("other".parse::<Scope>().is_err());
    }

    #[test]
    fn test_credential_debug_redacts_token() {
        let credential = Credential::new(Scope::Asset, "very-secret");
        assert!(!format!("{:?}", credential).contains("very-secret"));
    }
}
