//! Book files kept in the asset store.

use std::path::Path;

use bytes::Bytes;
use thiserror::Error;
use tracing::info;

use crate::gateway::{AssetMetadata, AssetRecord, AssetSession, PublicLinks, SessionError};
use crate::hosting::content_type_for;

/// File query matching the book formats the shelf lists.
pub const BOOK_QUERY: &str = "mimeType='application/pdf' or mimeType='application/epub+zip' \
                              or name contains '.mobi' or name contains '.azw'";

#[derive(Debug, Error)]
pub enum ShelfError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Upload, list, share and delete book files.
#[derive(Clone)]
pub struct BookShelf {
    session: AssetSession,
    folder: Option<String>,
}

impl BookShelf {
    pub fn new(session: AssetSession) -> Self {
        Self {
            session,
            folder: None,
        }
    }

    /// Upload into the folder with this id instead of the root.
    pub fn with_folder(mut self, folder: Option<String>) -> Self {
        self.folder = folder;
        self
    }

    pub async fn upload(
        &self,
        name: &str,
        data: Bytes,
        mime_type: Option<&str>,
    ) -> Result<AssetRecord, SessionError> {
        let metadata = AssetMetadata {
            name: name.to_string(),
            mime_type: mime_type.unwrap_or_else(|| content_type_for(name)).to_string(),
            parents: self.folder.iter().cloned().collect(),
        };

        let credential = self.session.credential().await?;
        let file = self.session.upload(&credential, data, &metadata).await?;
        info!(id = %file.id, name = %file.name, "Uploaded book");
        Ok(file)
    }

    /// Upload a local file under its own file name.
    pub async fn upload_file(&self, path: &Path) -> Result<AssetRecord, ShelfError> {
        let data = tokio::fs::read(path).await.map_err(|source| ShelfError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "book".to_string());

        Ok(self.upload(&name, Bytes::from(data), None).await?)
    }

    /// Every book file in the store.
    pub async fn list(&self) -> Result<Vec<AssetRecord>, SessionError> {
        let credential = self.session.credential().await?;
        Ok(self.session.list(&credential, Some(BOOK_QUERY)).await?)
    }

    /// Share a file with anyone and return its links.
    pub async fn publish(&self, id: &str) -> Result<PublicLinks, SessionError> {
        let credential = self.session.credential().await?;
        let links = self.session.set_public(&credential, id).await?;
        info!(id = %id, "Published book");
        Ok(links)
    }

    pub async fn remove(&self, id: &str) -> Result<(), SessionError> {
        let credential = self.session.credential().await?;
        self.session.delete(&credential, id).await?;
        info!(id = %id, "Removed book");
        Ok(())
    }
}

/// Human-readable size in binary units, e.g. `1.5 KB`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut exponent = 0;
    let mut scaled = bytes;
    while scaled >= 1024 && exponent < UNITS.len() - 1 {
        scaled /= 1024;
        exponent += 1;
    }
    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    format!("{} {}", (value * 100.0).round() / 100.0, UNITS[exponent])
}
