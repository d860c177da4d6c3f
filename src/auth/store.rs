//! On-disk persistence for the content credential.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::Credential;

/// File name of the persisted credential within the data directory.
pub const CREDENTIAL_FILE: &str = "content-credential.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid credential file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// A single credential stored as JSON at a fixed path.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default file name inside `data_dir`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(CREDENTIAL_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored credential. A missing file is `Ok(None)`.
    pub fn load(&self) -> Result<Option<Credential>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Replace the stored credential.
    pub fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&self.path, serde_json::to_vec_pretty(credential)?)?;

        // Set restrictive permissions (Unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Remove the stored credential. Succeeds if there is none.
    pub fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Scope;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let store = CredentialStore::in_dir(&temp.path().join("nested"));

        assert!(store.load().unwrap().is_none());

        let credential = Credential::new(Scope::Content, "abc");
        store.save(&credential).unwrap();
        assert_eq!(store.load().unwrap(), Some(credential));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(store.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_clear_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = CredentialStore::in_dir(temp.path());

        store.clear().unwrap();
        store.save(&Credential::new(Scope::Content, "abc")).unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file() {
        let temp = TempDir::new().unwrap();
        let store = CredentialStore::in_dir(temp.path());
        fs::write(store.path(), b"not json").unwrap();
        assert!(matches!(store.load(), Err(StoreError::Corrupt(_))));
    }
}
