mod common;

use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use shelfsync::api::{router, ApiState};
use shelfsync::auth::Scope;
use shelfsync::gateway::memory::{record, EchoMode, MemoryAssetStore, MemoryContentStore};
use shelfsync::hosting::MAX_ASSET_BYTES;
use shelfsync::SyncConfig;

struct TestServer {
    base: String,
    http: reqwest::Client,
    content: Arc<MemoryContentStore>,
    state: Arc<ApiState>,
}

impl TestServer {
    async fn start(content: MemoryContentStore) -> Self {
        let content = Arc::new(content);
        let vault = common::vault();
        let config = SyncConfig::new("blog-1").with_write_delay(std::time::Duration::ZERO);
        let state = Arc::new(ApiState::new(
            vault.clone(),
            common::content_session(content.clone(), &vault),
            common::asset_session(Arc::new(MemoryAssetStore::new()), &vault),
            config,
            CancellationToken::new(),
        ));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{}/api/v1", addr),
            http: reqwest::Client::new(),
            content,
            state,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

#[tokio::test]
async fn test_status_reports_local_state() {
    let server = TestServer::start(MemoryContentStore::new()).await;

    let status: Value = server
        .http
        .get(server.url("/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(status["status"], "ok");
    assert_eq!(status["blogId"], "blog-1");
    assert_eq!(status["contentSignedIn"], false);
    assert_eq!(server.content.calls(), 0);
}

#[tokio::test]
async fn test_validate_endpoint() {
    let server = TestServer::start(MemoryContentStore::new()).await;

    let result: Value = server
        .http
        .post(server.url("/posts/validate"))
        .json(&json!({"posts": [{"title": "Dune"}]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(result["valid"], false);
    assert_eq!(result["postsCount"], 1);
    assert_eq!(result["errors"][0], "Post 1: content is required");
    assert_eq!(server.content.calls(), 0);
}

#[tokio::test]
async fn test_import_with_update_policy() {
    let server =
        TestServer::start(MemoryContentStore::with_records([record("42", "Dune", "v1")])).await;

    let response = server
        .http
        .post(server.url("/posts/import?updateExisting=true"))
        .json(&json!({"posts": [
            {"title": "Dune", "content": "v2"},
            {"title": "Emma", "content": "new"}
        ]}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let report: Value = response.json().await.unwrap();
    assert_eq!(report["total"], 2);
    assert_eq!(report["updated"], 1);
    assert_eq!(report["created"], 1);
    assert_eq!(report["details"][0]["id"], "42");
}

#[tokio::test]
async fn test_invalid_import_is_unprocessable() {
    let server = TestServer::start(MemoryContentStore::new()).await;

    let response = server
        .http
        .post(server.url("/posts/import"))
        .json(&json!({"posts": []}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(server.content.calls(), 0);
}

#[tokio::test]
async fn test_export_selected_and_stats() {
    let server = TestServer::start(MemoryContentStore::with_records([
        record("1", "Dune", "a"),
        record("2", "Emma", "b"),
    ]))
    .await;

    let export: Value = server
        .http
        .get(server.url("/posts/export?ids=2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(export["totalPosts"], 1);
    assert_eq!(export["posts"][0]["title"], "Emma");

    let stats: Value = server
        .http
        .get(server.url("/posts/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["totalPosts"], 2);
    assert_eq!(stats["publishedPosts"], 2);
}

#[tokio::test]
async fn test_search_endpoint() {
    let server = TestServer::start(MemoryContentStore::with_records([
        record("1", "Dune", "spice"),
        record("2", "Emma", "manners"),
    ]))
    .await;

    let results: Value = server
        .http
        .get(server.url("/posts/search?q=spice"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(results["total"], 1);
    assert_eq!(results["items"][0]["id"], "1");

    let everything: Value = server
        .http
        .get(server.url("/posts/search"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(everything["total"], 2);
}

#[tokio::test]
async fn test_oversized_asset_is_refused() {
    let server = TestServer::start(MemoryContentStore::new()).await;

    let response = server
        .http
        .post(server.url("/assets"))
        .header("content-type", "image/png")
        .body(vec![0u8; MAX_ASSET_BYTES + 1])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(server.content.calls(), 0);
}

#[tokio::test]
async fn test_host_asset_endpoint() {
    let server = TestServer::start(MemoryContentStore::new()).await;

    let hosted: Value = server
        .http
        .post(server.url("/assets"))
        .header("content-type", "image/png")
        .body(vec![1u8, 2, 3])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert!(hosted["url"].as_str().unwrap().starts_with("https://images.example.test/"));
    assert!(server.content.records().is_empty());
}

#[tokio::test]
async fn test_host_asset_extraction_failure_is_bad_gateway() {
    let store = MemoryContentStore::new();
    store.set_echo(EchoMode::StripImages);
    let server = TestServer::start(store).await;

    let response = server
        .http
        .post(server.url("/assets"))
        .header("content-type", "image/png")
        .body(vec![1u8])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
    assert!(server.content.records().is_empty());
}

#[tokio::test]
async fn test_rejected_credential_is_unauthorized_and_dropped() {
    let store = MemoryContentStore::new();
    store.reject_credentials(true);
    let server = TestServer::start(store).await;

    let response = server.http.get(server.url("/posts/stats")).send().await.unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert!(!server.state.vault.has(Scope::Content));
}

#[tokio::test]
async fn test_sign_in_and_out() {
    let server = TestServer::start(MemoryContentStore::new()).await;

    let signed_in: Value = server
        .http
        .post(server.url("/auth/asset"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(signed_in["scope"], "asset");
    assert!(signed_in.get("token").is_none());
    assert!(server.state.vault.has(Scope::Asset));

    let response = server.http.delete(server.url("/auth/asset")).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
    assert!(!server.state.vault.has(Scope::Asset));

    let response = server.http.post(server.url("/auth/nonsense")).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}
