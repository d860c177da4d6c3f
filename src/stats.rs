//! Catalog statistics.

use std::collections::HashMap;

use serde::Serialize;

use crate::gateway::{ContentRecord, ContentSession, PostStatus, SessionError};
use crate::hosting::SENTINEL_TAG;

/// Number of tags reported in [`CatalogStats::top_tags`].
pub const TOP_TAGS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStats {
    pub total_posts: usize,
    pub published_posts: usize,
    pub draft_posts: usize,
    /// Most used tags, highest count first, ties by name.
    pub top_tags: Vec<TagCount>,
}

impl CatalogStats {
    pub fn from_records(records: &[ContentRecord]) -> Self {
        let posts: Vec<_> = records.iter().filter(|r| !r.has_tag(SENTINEL_TAG)).collect();

        let mut tags: HashMap<&str, usize> = HashMap::new();
        for tag in posts.iter().flat_map(|r| r.tags.iter()) {
            *tags.entry(tag.as_str()).or_default() += 1;
        }
        let mut top_tags: Vec<_> = tags
            .into_iter()
            .map(|(tag, count)| TagCount {
                tag: tag.to_string(),
                count,
            })
            .collect();
        top_tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
        top_tags.truncate(TOP_TAGS);

        Self {
            total_posts: posts.len(),
            published_posts: posts.iter().filter(|r| r.status == PostStatus::Published).count(),
            draft_posts: posts.iter().filter(|r| r.status == PostStatus::Draft).count(),
            top_tags,
        }
    }
}

/// Fetch the catalog and summarize it.
pub async fn catalog_stats(session: &ContentSession) -> Result<CatalogStats, SessionError> {
    let records = session.catalog().await?;
    Ok(CatalogStats::from_records(&records))
}
