//! Catalog export in the same document shape the importer reads.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::gateway::{ContentRecord, ContentSession, SessionError};
use crate::hosting::SENTINEL_TAG;

/// A dump of catalog posts. Feeding it back to the importer recreates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub export_date: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blog_id: Option<String>,

    pub total_posts: usize,

    pub posts: Vec<ContentRecord>,
}

impl ExportDocument {
    /// Build a document from catalog records, optionally keeping only `ids`.
    ///
    /// Temporary hosting posts are never exported.
    pub fn from_records(
        records: Vec<ContentRecord>,
        blog_id: Option<String>,
        ids: Option<&[String]>,
    ) -> Self {
        let posts: Vec<_> = records
            .into_iter()
            .filter(|r| !r.has_tag(SENTINEL_TAG))
            .filter(|r| ids.map_or(true, |ids| ids.iter().any(|id| *id == r.id)))
            .collect();

        Self {
            export_date: Utc::now(),
            blog_id,
            total_posts: posts.len(),
            posts,
        }
    }
}

/// Fetch the catalog and export all of it, or only the posts in `ids`.
pub async fn export_catalog(
    session: &ContentSession,
    ids: Option<&[String]>,
) -> Result<ExportDocument, SessionError> {
    let records = session.catalog().await?;
    let document = ExportDocument::from_records(records, session.gateway().catalog_id(), ids);
    info!(posts = document.total_posts, selected = ids.is_some(), "Exported catalog");
    Ok(document)
}

/// Default file name for a full backup taken on `date`.
pub fn backup_file_name(date: NaiveDate) -> String {
    format!("shelfsync-backup-{}.json", date.format("%Y-%m-%d"))
}
