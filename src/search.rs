//! Free-text post search.

use serde::Serialize;
use tracing::info;

use crate::gateway::{ContentRecord, ContentSession, SessionError};
use crate::hosting::SENTINEL_TAG;

/// Posts matching a search.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub query: String,
    pub total: usize,
    pub items: Vec<ContentRecord>,
}

impl SearchResults {
    fn new(query: &str, records: Vec<ContentRecord>) -> Self {
        let items: Vec<_> = records
            .into_iter()
            .filter(|r| !r.has_tag(SENTINEL_TAG))
            .collect();
        Self {
            query: query.to_string(),
            total: items.len(),
            items,
        }
    }
}

/// Search the catalog for `query`. A blank query lists every post.
pub async fn search_posts(
    session: &ContentSession,
    query: &str,
) -> Result<SearchResults, SessionError> {
    let query = query.trim();
    let records = if query.is_empty() {
        session.catalog().await?
    } else {
        let credential = session.credential().await?;
        session.search(&credential, query).await?
    };

    let results = SearchResults::new(query, records);
    info!(query = %query, hits = results.total, "Searched posts");
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{StaticGrant, Vault};
    use crate::gateway::memory::{record, MemoryContentStore};
    use std::sync::Arc;
    use std::time::Duration;

    fn session(store: &Arc<MemoryContentStore>) -> ContentSession {
        let vault = Arc::new(Vault::ephemeral(
            Arc::new(StaticGrant::new("c")),
            Arc::new(StaticGrant::none()),
        ));
        ContentSession::content(store.clone(), vault, Duration::from_secs(5))
    }

    fn store() -> Arc<MemoryContentStore> {
        let mut temp = record("3", "temp_image_1_0", "<img>");
        temp.tags.insert(SENTINEL_TAG.to_string());
        Arc::new(MemoryContentStore::with_records([
            record("1", "Dune", "spice and sand"),
            record("2", "Emma", "matchmaking"),
            temp,
        ]))
    }

    #[tokio::test]
    async fn test_search_matches_title_and_body() {
        let store = store();

        let results = search_posts(&session(&store), "  SPICE ").await.unwrap();
        assert_eq!(results.query, "SPICE");
        assert_eq!(results.total, 1);
        assert_eq!(results.items[0].id, "1");

        let results = search_posts(&session(&store), "emma").await.unwrap();
        assert_eq!(results.items[0].title, "Emma");
    }

    #[tokio::test]
    async fn test_blank_query_lists_catalog_without_temp_posts() {
        let store = store();

        let results = search_posts(&session(&store), "   ").await.unwrap();
        assert_eq!(results.total, 2);
        assert!(results.items.iter().all(|r| !r.has_tag(SENTINEL_TAG)));
    }

    #[tokio::test]
    async fn test_search_never_returns_temp_posts() {
        let store = store();

        let results = search_posts(&session(&store), "temp_image").await.unwrap();
        assert_eq!(results.total, 0);
    }
}
