//! Asset hosting through the content API.
//!
//! The content service has no upload endpoint, but it rehosts images that
//! arrive inline in a post body. [`AssetHost::host`] creates a throwaway
//! draft carrying the binary as a `data:` URI, reads back the rewritten body,
//! pulls out the hosted URL and deletes the draft again.
//!
//! ```text
//!   binary ──encode──▶ create(draft, temp_image) ──▶ get ──▶ extract <img src>
//!                              │                               │
//!                              └──────────── delete ◀──────────┘  (always)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use regex::Regex;
use reqwest::Url;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{AuthError, Credential};
use crate::gateway::{ContentSession, DesiredRecord, GatewayError, ListFilter, SessionError};

/// Tag carried by every ephemeral hosting record.
pub const SENTINEL_TAG: &str = "temp_image";

/// Largest binary callers should hand to [`AssetHost::host`].
pub const MAX_ASSET_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("no hosted reference found in the body of post {id}")]
    AssetExtractionFailed { id: String },

    #[error("asset hosted but temporary post {id} could not be deleted: {source}")]
    CleanupFailed { id: String, source: GatewayError },

    #[error("asset is {size} bytes, the limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("asset hosting cancelled")]
    Cancelled,
}

impl From<SessionError> for HostError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::Auth(e) => Self::Auth(e),
            SessionError::Gateway(e) => Self::Gateway(e),
            SessionError::Cancelled => Self::Cancelled,
        }
    }
}

/// Reject binaries above [`MAX_ASSET_BYTES`] before they are encoded.
pub fn check_asset_size(size: usize) -> Result<(), HostError> {
    if size > MAX_ASSET_BYTES {
        return Err(HostError::TooLarge {
            size,
            limit: MAX_ASSET_BYTES,
        });
    }
    Ok(())
}

/// Encode `binary` as a base64 `data:` URI.
pub fn encode_data_uri(binary: &[u8], content_type: &str) -> String {
    format!("data:{};base64,{}", content_type, STANDARD.encode(binary))
}

fn image_source() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).expect("valid regex")
    })
}

/// Extract the first `<img src>` of `body` as an http(s) URL.
///
/// Only the first image is considered. A `data:` source means the remote
/// did not rehost the binary and counts as no match.
pub fn extract_hosted_url(body: &str) -> Option<Url> {
    let source = image_source().captures(body)?.get(1)?.as_str();
    let url = Url::parse(&source.replace("&amp;", "&")).ok()?;
    match url.scheme() {
        "http" | "https" => Some(url),
        _ => None,
    }
}

/// Guess a content type from a file name's extension.
pub fn content_type_for(name: &str) -> &'static str {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "epub" => "application/epub+zip",
        "mobi" => "application/x-mobipocket-ebook",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// The temporary post a hosting call is responsible for.
enum Ephemeral {
    /// Create was sent but never answered; the post can only be found by title.
    Unconfirmed { title: String },
    Created { id: String },
}

impl Ephemeral {
    fn label(&self) -> &str {
        match self {
            Self::Unconfirmed { title } => title,
            Self::Created { id } => id,
        }
    }
}

/// Deletes an ephemeral record when released, or from a spawned task if
/// dropped before that.
struct EphemeralGuard {
    session: Option<ContentSession>,
    credential: Credential,
    target: Ephemeral,
}

impl EphemeralGuard {
    fn unconfirmed(session: ContentSession, credential: Credential, title: String) -> Self {
        Self {
            session: Some(session),
            credential,
            target: Ephemeral::Unconfirmed { title },
        }
    }

    fn confirm(&mut self, id: String) {
        self.target = Ephemeral::Created { id };
    }

    /// Nothing was created remotely.
    fn disarm(mut self) {
        self.session = None;
    }

    async fn release(mut self) -> Result<(), GatewayError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        cleanup(&session, &self.credential, &self.target).await
    }
}

impl Drop for EphemeralGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let credential = self.credential.clone();
        let target = std::mem::replace(
            &mut self.target,
            Ephemeral::Created { id: String::new() },
        );

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(post = %target.label(), "Hosting abandoned, deleting temporary post in background");
                handle.spawn(async move {
                    if let Err(e) = cleanup(&session, &credential, &target).await {
                        warn!(post = %target.label(), error = %e, "Background cleanup of temporary post failed");
                    }
                });
            }
            Err(_) => warn!(post = %target.label(), "No runtime to delete temporary post, it was left behind"),
        }
    }
}

async fn cleanup(
    session: &ContentSession,
    credential: &Credential,
    target: &Ephemeral,
) -> Result<(), GatewayError> {
    match target {
        Ephemeral::Created { id } => delete_ephemeral(session, credential, id).await,
        Ephemeral::Unconfirmed { title } => sweep_by_title(session, credential, title).await,
    }
}

async fn delete_ephemeral(
    session: &ContentSession,
    credential: &Credential,
    id: &str,
) -> Result<(), GatewayError> {
    match session.delete(credential, id).await {
        Ok(()) | Err(GatewayError::NotFound(_)) => {
            debug!(id = %id, "Deleted temporary post");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Delete sentinel posts titled `title`. Titles are unique per hosting call.
async fn sweep_by_title(
    session: &ContentSession,
    credential: &Credential,
    title: &str,
) -> Result<(), GatewayError> {
    let strays = session
        .list(credential, &ListFilter::tagged(SENTINEL_TAG))
        .await?;
    for stray in strays.iter().filter(|r| r.title == title) {
        warn!(id = %stray.id, title = %title, "Deleting temporary post whose create went unanswered");
        delete_ephemeral(session, credential, &stray.id).await?;
    }
    Ok(())
}

fn ephemeral_title() -> String {
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}_{}_{}",
        SENTINEL_TAG,
        Utc::now().timestamp_millis(),
        SEQUENCE.fetch_add(1, Ordering::Relaxed)
    )
}

/// Hosts binaries by round-tripping them through the content API.
#[derive(Clone)]
pub struct AssetHost {
    session: ContentSession,
}

impl AssetHost {
    pub fn new(session: ContentSession) -> Self {
        Self { session }
    }

    /// Turn `binary` into a public URL.
    ///
    /// Each call creates and deletes a fresh temporary post, so it is not
    /// idempotent. Size limits are the caller's business, see
    /// [`check_asset_size`]. The temporary post is deleted on every path out
    /// of this function, cancellation and unanswered creates included.
    pub async fn host(
        &self,
        binary: &[u8],
        content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<Url, HostError> {
        if cancel.is_cancelled() {
            return Err(HostError::Cancelled);
        }

        let credential = self.session.credential().await?;
        if cancel.is_cancelled() {
            return Err(HostError::Cancelled);
        }

        let title = ephemeral_title();
        let body = format!(
            r#"<img src="{}" alt="{}" />"#,
            encode_data_uri(binary, content_type),
            title
        );
        let ephemeral = DesiredRecord::new(title.clone(), body).with_tag(SENTINEL_TAG);

        let mut guard = EphemeralGuard::unconfirmed(self.session.clone(), credential.clone(), title);
        let created = match self.session.create(&credential, &ephemeral, true).await {
            Ok(created) => created,
            Err(e) if e.may_have_applied() => {
                if let Err(cleanup_error) = guard.release().await {
                    warn!(error = %cleanup_error, "Failed to sweep temporary post after unanswered create");
                }
                return Err(e.into());
            }
            Err(e) => {
                guard.disarm();
                return Err(e.into());
            }
        };
        let id = created.id.clone();
        debug!(id = %id, bytes = binary.len(), content_type = %content_type, "Created temporary post");
        guard.confirm(id.clone());

        if cancel.is_cancelled() {
            if let Err(e) = guard.release().await {
                warn!(id = %id, error = %e, "Failed to delete temporary post after cancellation");
            }
            return Err(HostError::Cancelled);
        }

        let fetched = self.session.get(&credential, &id).await;
        let hosted = fetched.as_ref().ok().and_then(|r| extract_hosted_url(&r.body));
        let cleanup = guard.release().await;

        let fetched = match fetched {
            Ok(record) => record,
            Err(e) => {
                if let Err(cleanup_error) = &cleanup {
                    warn!(id = %id, error = %cleanup_error, "Failed to delete temporary post");
                }
                return Err(e.into());
            }
        };

        let Some(url) = hosted else {
            if let Err(e) = &cleanup {
                warn!(id = %id, error = %e, "Failed to delete temporary post");
            }
            warn!(id = %id, body_len = fetched.body.len(), "Remote did not rehost the inline asset");
            return Err(HostError::AssetExtractionFailed { id });
        };

        if let Err(source) = cleanup {
            return Err(HostError::CleanupFailed { id, source });
        }
        if cancel.is_cancelled() {
            return Err(HostError::Cancelled);
        }

        info!(url = %url, "Hosted asset");
        Ok(url)
    }
}
