//! Remote gateways for the blog content API and the file storage API.
//!
//! Both services are plain CRUD-over-REST. The traits here are the seam the
//! rest of the crate is written against; `blogger` and `drive` talk HTTP,
//! `memory` is an in-process stand-in, used by tests and by
//! [`crate::reconcile::Reconciler::dry_run`] to replay a batch offline.

pub mod blogger;
pub mod drive;
pub mod memory;
pub mod session;

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::Credential;

pub use session::{AssetSession, ContentSession, Session, SessionError};

/// Classified failure of a single gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("credential rejected by remote (HTTP {status})")]
    Auth { status: u16 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("remote error {status}: {body}")]
    Remote { status: u16, body: String },
}

impl GatewayError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: String, what: &str) -> Self {
        match status {
            401 | 403 => Self::Auth { status },
            404 => Self::NotFound(what.to_string()),
            _ => Self::Remote { status, body },
        }
    }

    /// Classify a reqwest failure, keeping timeouts distinct.
    pub fn from_transport(error: reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            Self::Timeout(timeout)
        } else {
            Self::Transport(error.to_string())
        }
    }

    /// The remote rejected the credential used for the call.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// HTTP 429 from the remote.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Remote { status: 429, .. })
    }

    /// The call never got an answer, so the remote may still have applied it.
    pub fn may_have_applied(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

/// Bound a gateway call by `limit`, surfacing expiry as [`GatewayError::Timeout`].
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout(limit)),
    }
}

/// Turn a response into an error unless its status is a success.
pub(crate) async fn check_response(
    response: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::from_status(status.as_u16(), body, what))
}

/// Visibility of a post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PostStatus {
    /// Publicly listed.
    #[default]
    #[serde(rename = "LIVE", alias = "live", alias = "PUBLISHED", alias = "published")]
    Published,

    /// Not publicly listed. Scheduled posts are treated as drafts.
    #[serde(rename = "DRAFT", alias = "draft", alias = "SCHEDULED", alias = "scheduled")]
    Draft,
}

/// A post as the content API reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Remote identity, stable once assigned.
    pub id: String,

    #[serde(default)]
    pub title: String,

    /// Formatted body. May embed asset references.
    #[serde(rename = "content", default)]
    pub body: String,

    #[serde(rename = "labels", default)]
    pub tags: BTreeSet<String>,

    #[serde(default)]
    pub status: PostStatus,

    /// Remote-assigned creation time.
    #[serde(rename = "published", default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    /// Remote-assigned last update time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,

    /// Public URL of the post, if the remote reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ContentRecord {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Client-side description of a post we want to exist remotely.
///
/// Accepts both the export field names (`content`, `labels`) and the plain
/// ones (`body`, `tags`). Status and timestamps are proposals only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredRecord {
    /// Remote id, when the record is known to exist already.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub title: String,

    #[serde(rename = "content", alias = "body")]
    pub body: String,

    #[serde(rename = "labels", alias = "tags", default)]
    pub tags: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PostStatus>,

    #[serde(rename = "published", default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

impl DesiredRecord {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            body: body.into(),
            tags: BTreeSet::new(),
            status: None,
            created: None,
            updated: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

impl From<&ContentRecord> for DesiredRecord {
    fn from(record: &ContentRecord) -> Self {
        Self {
            id: Some(record.id.clone()),
            title: record.title.clone(),
            body: record.body.clone(),
            tags: record.tags.clone(),
            status: Some(record.status),
            created: record.created,
            updated: record.updated,
        }
    }
}

/// Narrows a catalog listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Only records carrying this tag.
    pub tag: Option<String>,
}

impl ListFilter {
    pub fn tagged(tag: impl Into<String>) -> Self {
        Self { tag: Some(tag.into()) }
    }

    pub fn matches(&self, record: &ContentRecord) -> bool {
        self.tag.as_deref().map_or(true, |tag| record.has_tag(tag))
    }
}

/// CRUD + search over content records.
#[async_trait]
pub trait ContentGateway: Send + Sync {
    /// Every record matching `filter`, across all pages.
    async fn list(
        &self,
        credential: &Credential,
        filter: &ListFilter,
    ) -> Result<Vec<ContentRecord>, GatewayError>;

    async fn get(&self, credential: &Credential, id: &str) -> Result<ContentRecord, GatewayError>;

    async fn search(
        &self,
        credential: &Credential,
        query: &str,
    ) -> Result<Vec<ContentRecord>, GatewayError>;

    async fn create(
        &self,
        credential: &Credential,
        record: &DesiredRecord,
        draft: bool,
    ) -> Result<ContentRecord, GatewayError>;

    async fn update(
        &self,
        credential: &Credential,
        id: &str,
        record: &DesiredRecord,
    ) -> Result<ContentRecord, GatewayError>;

    async fn delete(&self, credential: &Credential, id: &str) -> Result<(), GatewayError>;

    /// Identifier of the remote catalog (the blog id), if there is one.
    fn catalog_id(&self) -> Option<String> {
        None
    }
}

/// Metadata sent along with an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMetadata {
    pub name: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
}

/// A file held by the asset store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    /// Size in bytes. The remote encodes it as a decimal string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_view_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_content_link: Option<String>,
}

impl AssetRecord {
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_deref().and_then(|s| s.parse().ok())
    }
}

/// Links to a file after it has been shared publicly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicLinks {
    pub web_view_link: Option<String>,
    pub web_content_link: Option<String>,
    pub download_link: String,
}

/// Upload/list/delete/permission operations over binary files.
#[async_trait]
pub trait AssetGateway: Send + Sync {
    async fn upload(
        &self,
        credential: &Credential,
        data: Bytes,
        metadata: &AssetMetadata,
    ) -> Result<AssetRecord, GatewayError>;

    async fn list(
        &self,
        credential: &Credential,
        query: Option<&str>,
    ) -> Result<Vec<AssetRecord>, GatewayError>;

    /// Grant anyone read access and return the resulting links.
    async fn set_public(&self, credential: &Credential, id: &str)
        -> Result<PublicLinks, GatewayError>;

    async fn delete(&self, credential: &Credential, id: &str) -> Result<(), GatewayError>;
}

/// Direct download link for a shared file.
pub fn download_link(id: &str) -> String {
    format!(
        "https://drive.google.com/uc?export=download&id={}",
        urlencoding::encode(id)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            GatewayError::from_status(401, String::new(), "post 1"),
            GatewayError::Auth { status: 401 }
        );
        assert!(GatewayError::from_status(403, String::new(), "post 1").is_auth());
        assert_eq!(
            GatewayError::from_status(404, String::new(), "post 1"),
            GatewayError::NotFound("post 1".to_string())
        );
        assert!(GatewayError::from_status(429, "slow down".into(), "x").is_rate_limited());
        assert!(!GatewayError::from_status(500, String::new(), "x").is_auth());
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let limit = Duration::from_millis(10);
        let result: Result<(), _> = bounded(limit, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(GatewayError::Timeout(limit)));
    }

    #[test]
    fn test_desired_record_accepts_export_and_plain_names() {
        let exported: DesiredRecord = serde_json::from_value(serde_json::json!({
            "id": "7",
            "title": "Dune",
            "content": "<p>spice</p>",
            "labels": ["scifi", "classic"],
            "status": "LIVE",
            "url": "https://example.blogspot.com/dune.html"
        }))
        .unwrap();
        assert_eq!(exported.id.as_deref(), Some("7"));
        assert_eq!(exported.body, "<p>spice</p>");
        assert_eq!(exported.tags.len(), 2);
        assert_eq!(exported.status, Some(PostStatus::Published));

        let plain: DesiredRecord = serde_json::from_value(serde_json::json!({
            "title": "Emma",
            "body": "text",
            "tags": ["austen"]
        }))
        .unwrap();
        assert_eq!(plain.body, "text");
        assert!(plain.tags.contains("austen"));
        assert!(plain.id.is_none());
    }

    #[test]
    fn test_content_record_parses_remote_post() {
        let record: ContentRecord = serde_json::from_value(serde_json::json!({
            "kind": "blogger#post",
            "id": "42",
            "title": "Dune",
            "content": "<p>hi</p>",
            "status": "DRAFT",
            "published": "2024-03-01T10:00:00-03:00",
            "updated": "2024-03-02T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(record.status, PostStatus::Draft);
        assert!(record.tags.is_empty());
        assert_eq!(
            record.created.unwrap().to_rfc3339(),
            "2024-03-01T13:00:00+00:00"
        );
    }

    #[test]
    fn test_download_link_encodes_id() {
        assert_eq!(
            download_link("a b"),
            "https://drive.google.com/uc?export=download&id=a%20b"
        );
    }
}
