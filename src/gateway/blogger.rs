//! HTTP client for the blog content API (Blogger v3 resource shapes).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    check_response, ContentGateway, ContentRecord, DesiredRecord, GatewayError, ListFilter,
};
use crate::auth::Credential;
use crate::config::SyncConfig;

/// Page size requested when listing posts.
const PAGE_SIZE: u32 = 500;

/// Post body sent on create and update.
#[derive(Debug, Serialize)]
struct PostBody<'a> {
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    blog: BlogRef<'a>,
    title: &'a str,
    content: &'a str,
    labels: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct BlogRef<'a> {
    id: &'a str,
}

/// One page of a post listing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostList {
    #[serde(default)]
    items: Vec<ContentRecord>,
    next_page_token: Option<String>,
}

/// Content gateway backed by the remote blog API.
#[derive(Clone)]
pub struct BloggerClient {
    http: Client,
    base_url: String,
    blog_id: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl BloggerClient {
    pub fn new(http: Client, config: &SyncConfig) -> Self {
        Self {
            http,
            base_url: config.content_api_url.trim_end_matches('/').to_string(),
            blog_id: config.blog_id.clone(),
            api_key: config.api_key.clone(),
            timeout: config.request_timeout,
        }
    }

    fn posts_url(&self) -> String {
        format!("{}/blogs/{}/posts", self.base_url, self.blog_id)
    }

    fn post_url(&self, id: &str) -> String {
        format!("{}/{}", self.posts_url(), urlencoding::encode(id))
    }

    fn request(&self, method: Method, url: &str, credential: &Credential) -> RequestBuilder {
        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(credential.token())
            .timeout(self.timeout);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key)]);
        }
        request
    }

    fn body<'a>(&'a self, id: Option<&'a str>, record: &'a DesiredRecord) -> PostBody<'a> {
        PostBody {
            kind: "blogger#post",
            id,
            blog: BlogRef { id: &self.blog_id },
            title: &record.title,
            content: &record.body,
            labels: record.tags.iter().map(String::as_str).collect(),
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<reqwest::Response, GatewayError> {
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::from_transport(e, self.timeout))?;
        check_response(response, what).await
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, GatewayError> {
        self.send(request, what)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Transport(format!("invalid response for {}: {}", what, e)))
    }
}

#[async_trait]
impl ContentGateway for BloggerClient {
    async fn list(
        &self,
        credential: &Credential,
        filter: &ListFilter,
    ) -> Result<Vec<ContentRecord>, GatewayError> {
        let url = self.posts_url();
        let mut records = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .request(Method::GET, &url, credential)
                .query(&[
                    ("fetchBodies", "true"),
                    ("fetchImages", "true"),
                    ("view", "ADMIN"),
                    ("status", "live"),
                    ("status", "draft"),
                ])
                .query(&[("maxResults", PAGE_SIZE)]);
            if let Some(tag) = &filter.tag {
                request = request.query(&[("labels", tag)]);
            }
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let page: PostList = self.send_json(request, "post list").await?;
            debug!(count = page.items.len(), "Fetched post page");
            records.extend(page.items);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(records)
    }

    async fn get(&self, credential: &Credential, id: &str) -> Result<ContentRecord, GatewayError> {
        let request = self.request(Method::GET, &self.post_url(id), credential);
        self.send_json(request, &format!("post {}", id)).await
    }

    async fn search(
        &self,
        credential: &Credential,
        query: &str,
    ) -> Result<Vec<ContentRecord>, GatewayError> {
        let url = format!("{}/search", self.posts_url());
        let request = self
            .request(Method::GET, &url, credential)
            .query(&[("q", query), ("fetchBodies", "true")]);
        let page: PostList = self.send_json(request, "post search").await?;
        Ok(page.items)
    }

    async fn create(
        &self,
        credential: &Credential,
        record: &DesiredRecord,
        draft: bool,
    ) -> Result<ContentRecord, GatewayError> {
        let request = self
            .request(Method::POST, &self.posts_url(), credential)
            .query(&[("isDraft", draft)])
            .json(&self.body(None, record));
        self.send_json(request, &format!("new post '{}'", record.title)).await
    }

    async fn update(
        &self,
        credential: &Credential,
        id: &str,
        record: &DesiredRecord,
    ) -> Result<ContentRecord, GatewayError> {
        let request = self
            .request(Method::PUT, &self.post_url(id), credential)
            .json(&self.body(Some(id), record));
        self.send_json(request, &format!("post {}", id)).await
    }

    async fn delete(&self, credential: &Credential, id: &str) -> Result<(), GatewayError> {
        let request = self.request(Method::DELETE, &self.post_url(id), credential);
        self.send(request, &format!("post {}", id)).await?;
        Ok(())
    }

    fn catalog_id(&self) -> Option<String> {
        Some(self.blog_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Scope;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> BloggerClient {
        let config = SyncConfig::new("blog1")
            .with_content_api_url(server.uri())
            .with_api_key("k");
        BloggerClient::new(Client::new(), &config)
    }

    fn credential() -> Credential {
        Credential::new(Scope::Content, "tok")
    }

    #[tokio::test]
    async fn test_list_follows_page_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blogs/blog1/posts"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"id": "2", "title": "Emma", "content": "b"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/blogs/blog1/posts"))
            .and(header("authorization", "Bearer tok"))
            .and(query_param("key", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"id": "1", "title": "Dune", "content": "a", "labels": ["scifi"]}],
                "nextPageToken": "p2"
            })))
            .mount(&server)
            .await;

        let records = client(&server)
            .list(&credential(), &ListFilter::default())
            .await
            .unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(records[0].has_tag("scifi"));
    }

    #[tokio::test]
    async fn test_create_sends_draft_flag_and_labels() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/blogs/blog1/posts"))
            .and(query_param("isDraft", "true"))
            .and(body_partial_json(serde_json::json!({
                "kind": "blogger#post",
                "blog": {"id": "blog1"},
                "title": "Dune",
                "labels": ["scifi"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "99", "title": "Dune", "content": "x", "status": "DRAFT"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = client(&server)
            .create(&credential(), &DesiredRecord::new("Dune", "x").with_tag("scifi"), true)
            .await
            .unwrap();
        assert_eq!(created.id, "99");
    }

    #[tokio::test]
    async fn test_status_codes_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blogs/blog1/posts/1"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/blogs/blog1/posts/2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/blogs/blog1/posts/3"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(client.get(&credential(), "1").await.unwrap_err().is_auth());
        assert!(matches!(
            client.delete(&credential(), "2").await,
            Err(GatewayError::NotFound(_))
        ));
        let err = client
            .update(&credential(), "3", &DesiredRecord::new("t", "b"))
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blogs/blog1/posts/1"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let config = SyncConfig::new("blog1")
            .with_content_api_url(server.uri())
            .with_request_timeout(Duration::from_millis(100));
        let client = BloggerClient::new(Client::new(), &config);
        assert_eq!(
            client.get(&credential(), "1").await,
            Err(GatewayError::Timeout(Duration::from_millis(100)))
        );
    }
}
