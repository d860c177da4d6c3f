//! Outcome of a sync run.

use serde::{Deserialize, Serialize};

/// What happened to one desired record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Created,
    Updated,
    Skipped,
    Failed,
}

/// Per-record entry of a [`ReconciliationReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordOutcome {
    pub title: String,

    #[serde(rename = "status")]
    pub kind: OutcomeKind,

    /// Remote id written to, for created and updated records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Why a record was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Why a write failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecordOutcome {
    pub fn created(title: impl Into<String>, id: impl Into<String>) -> Self {
        Self::written(title, OutcomeKind::Created, id)
    }

    pub fn updated(title: impl Into<String>, id: impl Into<String>) -> Self {
        Self::written(title, OutcomeKind::Updated, id)
    }

    pub fn skipped(title: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            kind: OutcomeKind::Skipped,
            id: None,
            reason: Some(reason.into()),
            error: None,
        }
    }

    pub fn failed(title: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            kind: OutcomeKind::Failed,
            id: None,
            reason: None,
            error: Some(error.into()),
        }
    }

    fn written(title: impl Into<String>, kind: OutcomeKind, id: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            kind,
            id: Some(id.into()),
            reason: None,
            error: None,
        }
    }
}

/// A write that failed, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordError {
    pub title: String,
    pub error: String,
}

/// Result of one sync run. Built once from the ordered outcomes and not
/// changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    total: usize,
    created: usize,
    updated: usize,
    skipped: usize,
    failed: usize,
    details: Vec<RecordOutcome>,
    errors: Vec<RecordError>,
}

impl ReconciliationReport {
    /// Fold ordered outcomes into a report.
    pub fn from_outcomes(details: Vec<RecordOutcome>) -> Self {
        let mut report = Self {
            total: details.len(),
            created: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            details: Vec::new(),
            errors: Vec::new(),
        };

        for outcome in &details {
            match outcome.kind {
                OutcomeKind::Created => report.created += 1,
                OutcomeKind::Updated => report.updated += 1,
                OutcomeKind::Skipped => report.skipped += 1,
                OutcomeKind::Failed => {
                    report.failed += 1;
                    report.errors.push(RecordError {
                        title: outcome.title.clone(),
                        error: outcome.error.clone().unwrap_or_default(),
                    });
                }
            }
        }

        report.details = details;
        report
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn created(&self) -> usize {
        self.created
    }

    pub fn updated(&self) -> usize {
        self.updated
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn details(&self) -> &[RecordOutcome] {
        &self.details
    }

    pub fn errors(&self) -> &[RecordError] {
        &self.errors
    }

    /// No record failed.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}
