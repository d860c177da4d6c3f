//! Runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default base URL of the blog content API.
pub const DEFAULT_CONTENT_API_URL: &str = "https://www.googleapis.com/blogger/v3";

/// Default base URL of the file storage API.
pub const DEFAULT_ASSET_API_URL: &str = "https://www.googleapis.com/drive/v3";

/// Default base URL for file uploads.
pub const DEFAULT_ASSET_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3";

/// Configuration shared by the gateways, the vault and the sync engine.
#[derive(Clone)]
pub struct SyncConfig {
    /// Directory holding the persisted content credential.
    pub data_dir: PathBuf,

    /// Blog whose posts make up the catalog.
    pub blog_id: String,

    /// Optional API key sent with every content request.
    pub api_key: Option<String>,

    pub content_api_url: String,

    pub asset_api_url: String,

    pub asset_upload_url: String,

    /// Upper bound for any single remote call.
    /// Default: 30s
    pub request_timeout: Duration,

    /// Pause after every successful write during a sync run.
    /// Default: 500ms
    pub write_delay: Duration,

    /// Slow down subsequent writes after a 429. Never retries the failed write.
    pub backoff_on_rate_limit: bool,
}

impl SyncConfig {
    /// Create a config for `blog_id` with defaults for everything else.
    pub fn new(blog_id: impl Into<String>) -> Self {
        Self {
            data_dir: default_data_dir(),
            blog_id: blog_id.into(),
            api_key: None,
            content_api_url: DEFAULT_CONTENT_API_URL.to_string(),
            asset_api_url: DEFAULT_ASSET_API_URL.to_string(),
            asset_upload_url: DEFAULT_ASSET_UPLOAD_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            write_delay: Duration::from_millis(500),
            backoff_on_rate_limit: false,
        }
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_content_api_url(mut self, url: impl Into<String>) -> Self {
        self.content_api_url = url.into();
        self
    }

    pub fn with_asset_api_url(mut self, url: impl Into<String>) -> Self {
        self.asset_api_url = url.into();
        self
    }

    pub fn with_asset_upload_url(mut self, url: impl Into<String>) -> Self {
        self.asset_upload_url = url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn with_rate_limit_backoff(mut self, enabled: bool) -> Self {
        self.backoff_on_rate_limit = enabled;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("data_dir", &self.data_dir)
            .field("blog_id", &self.blog_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("content_api_url", &self.content_api_url)
            .field("asset_api_url", &self.asset_api_url)
            .field("request_timeout", &self.request_timeout)
            .field("write_delay", &self.write_delay)
            .field("backoff_on_rate_limit", &self.backoff_on_rate_limit)
            .finish()
    }
}

/// Get the default data directory.
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "shelfsync", "shelfsync")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".shelfsync"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::new("b1");
        assert_eq!(config.blog_id, "b1");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.write_delay, Duration::from_millis(500));
        assert!(!config.backoff_on_rate_limit);
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = SyncConfig::new("b1").with_api_key("secret-key");
        let printed = format!("{:?}", config);
        assert!(!printed.contains("secret-key"));
        assert!(printed.contains("<redacted>"));
    }
}
