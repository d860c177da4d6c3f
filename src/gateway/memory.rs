//! In-process gateways.
//!
//! Behave like the remote services closely enough to exercise the sync and
//! hosting logic: ids are assigned on create, bodies are normalized on write
//! and failures can be injected per title.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use regex::Regex;

use super::{
    download_link, AssetGateway, AssetMetadata, AssetRecord, ContentGateway, ContentRecord,
    DesiredRecord, GatewayError, ListFilter, PostStatus, PublicLinks,
};
use crate::auth::Credential;

/// How the store rewrites embedded images when a body is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EchoMode {
    /// Replace inline `data:` images with URLs under `base_url`, like the real service.
    Rehost { base_url: String },
    /// Store the body untouched.
    Verbatim,
    /// Drop every `<img>` tag.
    StripImages,
}

impl Default for EchoMode {
    fn default() -> Self {
        Self::Rehost {
            base_url: "https://images.example.test".to_string(),
        }
    }
}

#[derive(Default)]
struct ContentState {
    records: Vec<ContentRecord>,
    next_id: u64,
    echo: EchoMode,
    reject_credentials: bool,
    fail_deletes: bool,
    write_failures: HashMap<String, GatewayError>,
    calls: usize,
}

/// Content store held in memory.
pub struct MemoryContentStore {
    state: Mutex<ContentState>,
    catalog_id: Option<String>,
}

impl Default for MemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ContentState {
                next_id: 1000,
                ..Default::default()
            }),
            catalog_id: None,
        }
    }

    pub fn with_records(records: impl IntoIterator<Item = ContentRecord>) -> Self {
        let store = Self::new();
        store.lock().records.extend(records);
        store
    }

    pub fn with_catalog_id(mut self, id: impl Into<String>) -> Self {
        self.catalog_id = Some(id.into());
        self
    }

    pub fn set_echo(&self, echo: EchoMode) {
        self.lock().echo = echo;
    }

    /// Answer every call with HTTP 401 while set.
    pub fn reject_credentials(&self, reject: bool) {
        self.lock().reject_credentials = reject;
    }

    /// Fail deletes with a remote 500 while set.
    pub fn fail_deletes(&self, fail: bool) {
        self.lock().fail_deletes = fail;
    }

    /// Fail creates and updates of records titled `title` with `error`.
    pub fn fail_writes_for(&self, title: impl Into<String>, error: GatewayError) {
        self.lock().write_failures.insert(title.into(), error);
    }

    /// Snapshot of every stored record.
    pub fn records(&self) -> Vec<ContentRecord> {
        self.lock().records.clone()
    }

    /// Number of gateway calls served so far.
    pub fn calls(&self) -> usize {
        self.lock().calls
    }

    fn lock(&self) -> MutexGuard<'_, ContentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self) -> Result<MutexGuard<'_, ContentState>, GatewayError> {
        let mut state = self.lock();
        state.calls += 1;
        if state.reject_credentials {
            return Err(GatewayError::Auth { status: 401 });
        }
        Ok(state)
    }
}

impl ContentState {
    fn check_write(&self, title: &str) -> Result<(), GatewayError> {
        match self.write_failures.get(title) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn normalize(&self, id: &str, body: &str) -> String {
        match &self.echo {
            EchoMode::Verbatim => body.to_string(),
            EchoMode::StripImages => image_tag().replace_all(body, "").into_owned(),
            EchoMode::Rehost { base_url } => {
                let mut n = 0;
                inline_source()
                    .replace_all(body, |_: &regex::Captures<'_>| {
                        n += 1;
                        format!("src=\"{}/{}/{}.img\"", base_url.trim_end_matches('/'), id, n)
                    })
                    .into_owned()
            }
        }
    }

    fn position(&self, id: &str) -> Result<usize, GatewayError> {
        self.records
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| GatewayError::NotFound(format!("post {}", id)))
    }
}

fn image_tag() -> Regex {
    Regex::new(r"<img[^>]*>").expect("valid regex")
}

fn inline_source() -> Regex {
    Regex::new(r#"src="data:[^"]*""#).expect("valid regex")
}

#[async_trait]
impl ContentGateway for MemoryContentStore {
    async fn list(
        &self,
        _credential: &Credential,
        filter: &ListFilter,
    ) -> Result<Vec<ContentRecord>, GatewayError> {
        let state = self.enter()?;
        Ok(state
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn get(&self, _credential: &Credential, id: &str) -> Result<ContentRecord, GatewayError> {
        let state = self.enter()?;
        let index = state.position(id)?;
        Ok(state.records[index].clone())
    }

    async fn search(
        &self,
        _credential: &Credential,
        query: &str,
    ) -> Result<Vec<ContentRecord>, GatewayError> {
        let state = self.enter()?;
        let needle = query.to_lowercase();
        Ok(state
            .records
            .iter()
            .filter(|r| {
                r.title.to_lowercase().contains(&needle) || r.body.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }

    async fn create(
        &self,
        _credential: &Credential,
        record: &DesiredRecord,
        draft: bool,
    ) -> Result<ContentRecord, GatewayError> {
        let mut state = self.enter()?;
        state.check_write(&record.title)?;

        state.next_id += 1;
        let id = state.next_id.to_string();
        let now = Utc::now();
        let created = ContentRecord {
            body: state.normalize(&id, &record.body),
            id,
            title: record.title.clone(),
            tags: record.tags.clone(),
            status: if draft { PostStatus::Draft } else { PostStatus::Published },
            created: Some(now),
            updated: Some(now),
            url: None,
        };
        state.records.push(created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        _credential: &Credential,
        id: &str,
        record: &DesiredRecord,
    ) -> Result<ContentRecord, GatewayError> {
        let mut state = self.enter()?;
        let index = state.position(id)?;
        state.check_write(&record.title)?;

        let body = state.normalize(id, &record.body);
        let stored = &mut state.records[index];
        stored.title = record.title.clone();
        stored.body = body;
        stored.tags = record.tags.clone();
        stored.updated = Some(Utc::now());
        Ok(stored.clone())
    }

    async fn delete(&self, _credential: &Credential, id: &str) -> Result<(), GatewayError> {
        let mut state = self.enter()?;
        if state.fail_deletes {
            return Err(GatewayError::Remote {
                status: 500,
                body: "backend error".to_string(),
            });
        }
        let index = state.position(id)?;
        state.records.remove(index);
        Ok(())
    }

    fn catalog_id(&self) -> Option<String> {
        self.catalog_id.clone()
    }
}

/// Build a stored record for seeding a [`MemoryContentStore`].
pub fn record(id: &str, title: &str, body: &str) -> ContentRecord {
    ContentRecord {
        id: id.to_string(),
        title: title.to_string(),
        body: body.to_string(),
        tags: BTreeSet::new(),
        status: PostStatus::Published,
        created: None,
        updated: None,
        url: None,
    }
}

#[derive(Default)]
struct AssetState {
    files: Vec<AssetRecord>,
    public: BTreeSet<String>,
    next_id: u64,
    calls: usize,
}

/// File store held in memory.
#[derive(Default)]
pub struct MemoryAssetStore {
    state: Mutex<AssetState>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files(&self) -> Vec<AssetRecord> {
        self.lock().files.clone()
    }

    pub fn is_public(&self, id: &str) -> bool {
        self.lock().public.contains(id)
    }

    pub fn calls(&self) -> usize {
        self.lock().calls
    }

    fn lock(&self) -> MutexGuard<'_, AssetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Evaluate the `or`-joined subset of the file query language the shelf uses:
/// `mimeType='…'` and `name contains '…'` clauses.
fn query_matches(query: &str, file: &AssetRecord) -> bool {
    query.split(" or ").any(|clause| {
        let clause = clause.trim();
        if let Some(value) = clause.strip_prefix("mimeType=") {
            value.trim_matches('\'') == file.mime_type
        } else if let Some(value) = clause.strip_prefix("name contains ") {
            file.name.contains(value.trim_matches('\''))
        } else {
            false
        }
    })
}

#[async_trait]
impl AssetGateway for MemoryAssetStore {
    async fn upload(
        &self,
        _credential: &Credential,
        data: Bytes,
        metadata: &AssetMetadata,
    ) -> Result<AssetRecord, GatewayError> {
        let mut state = self.lock();
        state.calls += 1;
        state.next_id += 1;
        let id = format!("file-{}", state.next_id);
        let now = Utc::now();
        let file = AssetRecord {
            web_view_link: Some(format!("https://files.example.test/{}/view", id)),
            web_content_link: None,
            id,
            name: metadata.name.clone(),
            mime_type: metadata.mime_type.clone(),
            size: Some(data.len().to_string()),
            created_time: Some(now),
            modified_time: Some(now),
        };
        state.files.push(file.clone());
        Ok(file)
    }

    async fn list(
        &self,
        _credential: &Credential,
        query: Option<&str>,
    ) -> Result<Vec<AssetRecord>, GatewayError> {
        let mut state = self.lock();
        state.calls += 1;
        Ok(state
            .files
            .iter()
            .filter(|f| query.map_or(true, |q| query_matches(q, f)))
            .cloned()
            .collect())
    }

    async fn set_public(
        &self,
        _credential: &Credential,
        id: &str,
    ) -> Result<PublicLinks, GatewayError> {
        let mut state = self.lock();
        state.calls += 1;
        let file = state
            .files
            .iter()
            .find(|f| f.id == id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("file {}", id)))?;
        state.public.insert(id.to_string());
        Ok(PublicLinks {
            web_view_link: file.web_view_link,
            web_content_link: Some(format!("https://files.example.test/{}/content", id)),
            download_link: download_link(id),
        })
    }

    async fn delete(&self, _credential: &Credential, id: &str) -> Result<(), GatewayError> {
        let mut state = self.lock();
        state.calls += 1;
        let index = state
            .files
            .iter()
            .position(|f| f.id == id)
            .ok_or_else(|| GatewayError::NotFound(format!("file {}", id)))?;
        state.files.remove(index);
        state.public.remove(id);
        Ok(())
    }
}
