//! Reconciliation of a batch of desired posts against the remote catalog.
//!
//! One run fetches the catalog once, matches every desired record against
//! it by remote id or case-insensitive title, and then writes sequentially:
//!
//! | match | `updateExisting` | action  |
//! |-------|------------------|---------|
//! | none  | any              | create  |
//! | yes   | true             | update  |
//! | yes   | false            | skip    |
//!
//! A failed write is recorded and the run moves on. The one exception is a
//! rejected credential: the vault drops it, so every record after it is
//! reported with the same error instead of being attempted.

pub mod report;
pub mod throttle;
pub mod validate;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{AuthError, Credential, StaticGrant, Vault};
use crate::config::SyncConfig;
use crate::gateway::memory::MemoryContentStore;
use crate::gateway::{
    ContentRecord, ContentSession, DesiredRecord, GatewayError, ListFilter, SessionError,
};

pub use report::{OutcomeKind, RecordError, RecordOutcome, ReconciliationReport};
pub use throttle::WriteThrottle;
pub use validate::{parse_batch, validate, ValidationResult};

const ALREADY_EXISTS: &str = "already exists";
const CANCELLED: &str = "cancelled";

/// Errors that fail a whole run. Per-record failures go into the report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("invalid import document: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("sync cancelled before any write")]
    Cancelled,
}

impl From<SessionError> for SyncError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::Auth(e) => Self::Auth(e),
            SessionError::Gateway(e) => Self::Gateway(e),
            SessionError::Cancelled => Self::Cancelled,
        }
    }
}

/// How to treat desired records that already exist remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcilePolicy {
    /// Leave matched records alone. Also the behaviour when neither flag is set.
    pub skip_existing: bool,

    /// Overwrite matched records. Wins over `skip_existing`.
    pub update_existing: bool,

    /// Create new records as drafts.
    #[serde(alias = "asDraft")]
    pub host_as_draft: bool,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            skip_existing: true,
            update_existing: false,
            host_as_draft: false,
        }
    }
}

/// Catalog lookups by id and by lower-cased title. First record wins on
/// duplicate titles.
struct CatalogIndex<'a> {
    by_id: HashMap<&'a str, &'a ContentRecord>,
    by_title: HashMap<String, &'a ContentRecord>,
}

impl<'a> CatalogIndex<'a> {
    fn build(catalog: &'a [ContentRecord]) -> Self {
        let mut by_id = HashMap::with_capacity(catalog.len());
        let mut by_title = HashMap::with_capacity(catalog.len());
        for record in catalog {
            by_id.entry(record.id.as_str()).or_insert(record);
            by_title.entry(record.title.to_lowercase()).or_insert(record);
        }
        Self { by_id, by_title }
    }

    /// The existing record `desired` collides with, id first.
    fn find(&self, desired: &DesiredRecord) -> Option<&'a ContentRecord> {
        desired
            .id
            .as_deref()
            .and_then(|id| self.by_id.get(id).copied())
            .or_else(|| self.by_title.get(&desired.title.to_lowercase()).copied())
    }
}

/// Applies batches of desired records to the content catalog.
#[derive(Clone)]
pub struct Reconciler {
    session: ContentSession,
    write_delay: Duration,
    backoff_on_rate_limit: bool,
}

impl Reconciler {
    pub fn new(session: ContentSession, config: &SyncConfig) -> Self {
        Self {
            session,
            write_delay: config.write_delay,
            backoff_on_rate_limit: config.backoff_on_rate_limit,
        }
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// Validate a raw import document and reconcile its posts.
    pub async fn import(
        &self,
        raw: &serde_json::Value,
        policy: ReconcilePolicy,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationReport, SyncError> {
        let desired = parse_batch(raw)?;
        self.reconcile(&desired, policy, cancel).await
    }

    /// Report what [`Reconciler::import`] would do, writing nothing remotely.
    ///
    /// The live catalog is fetched once and the batch is replayed against an
    /// in-memory copy of it. Ids reported for created posts are placeholders.
    pub async fn dry_run(
        &self,
        raw: &serde_json::Value,
        policy: ReconcilePolicy,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationReport, SyncError> {
        let desired = parse_batch(raw)?;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let catalog = self.session.catalog().await?;
        info!(existing = catalog.len(), "Dry run against a copy of the catalog");
        let vault = Arc::new(Vault::ephemeral(
            Arc::new(StaticGrant::new("dry-run")),
            Arc::new(StaticGrant::none()),
        ));
        let preview = Self {
            session: ContentSession::content(
                Arc::new(MemoryContentStore::with_records(catalog)),
                vault,
                self.session.timeout(),
            ),
            write_delay: Duration::ZERO,
            backoff_on_rate_limit: false,
        };
        preview.reconcile(&desired, policy, cancel).await
    }

    /// Bring the remote catalog in line with `desired`.
    ///
    /// Fails only when no write could be attempted: cancelled up front, no
    /// credential, or the catalog fetch failed. Everything after that ends up
    /// in the report, one entry per desired record in input order.
    pub async fn reconcile(
        &self,
        desired: &[DesiredRecord],
        policy: ReconcilePolicy,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationReport, SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let credential = self.session.credential().await?;
        let catalog = self.session.list(&credential, &ListFilter::default()).await?;
        let index = CatalogIndex::build(&catalog);
        info!(
            desired = desired.len(),
            existing = catalog.len(),
            update_existing = policy.update_existing,
            "Starting sync"
        );

        let mut throttle = WriteThrottle::new(self.write_delay, self.backoff_on_rate_limit);
        let mut halted: Option<String> = None;
        let mut outcomes = Vec::with_capacity(desired.len());

        for record in desired {
            if halted.is_none() && cancel.is_cancelled() {
                warn!(remaining = desired.len() - outcomes.len(), "Sync cancelled");
                halted = Some(CANCELLED.to_string());
            }
            if let Some(reason) = &halted {
                outcomes.push(RecordOutcome::failed(&record.title, reason));
                continue;
            }

            let written = match index.find(record) {
                None => self
                    .create(&credential, record, policy.host_as_draft)
                    .await
                    .map(|created| RecordOutcome::created(&record.title, created.id)),
                Some(existing) if policy.update_existing => self
                    .update(&credential, &existing.id, record)
                    .await
                    .map(|updated| RecordOutcome::updated(&record.title, updated.id)),
                Some(existing) => {
                    debug!(title = %record.title, id = %existing.id, "Skipping existing post");
                    outcomes.push(RecordOutcome::skipped(&record.title, ALREADY_EXISTS));
                    continue;
                }
            };

            match written {
                Ok(outcome) => {
                    outcomes.push(outcome);
                    throttle.after_write(cancel).await;
                }
                Err(e) => {
                    warn!(title = %record.title, error = %e, "Write failed");
                    if e.is_rate_limited() {
                        throttle.report_rate_limited();
                    }
                    if e.is_auth() {
                        halted = Some(e.to_string());
                    }
                    outcomes.push(RecordOutcome::failed(&record.title, e.to_string()));
                }
            }
        }

        let report = ReconciliationReport::from_outcomes(outcomes);
        info!(
            total = report.total(),
            created = report.created(),
            updated = report.updated(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Sync finished"
        );
        Ok(report)
    }

    async fn create(
        &self,
        credential: &Credential,
        record: &DesiredRecord,
        draft: bool,
    ) -> Result<ContentRecord, GatewayError> {
        let created = self.session.create(credential, record, draft).await?;
        info!(title = %record.title, id = %created.id, draft, "Created post");
        Ok(created)
    }

    async fn update(
        &self,
        credential: &Credential,
        id: &str,
        record: &DesiredRecord,
    ) -> Result<ContentRecord, GatewayError> {
        let updated = self.session.update(credential, id, record).await?;
        info!(title = %record.title, id = %updated.id, "Updated post");
        Ok(updated)
    }
}
