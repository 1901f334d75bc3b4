//! Whole-file persistence for the signing-key store.
//!
//! The store is one versionless JSON document, rewritten in full on every
//! rotation. Writes go through a temp file and an atomic rename so a
//! crash mid-write can never truncate the only copy of the key material.

use crate::errors::AuthError;
use crate::models::KeyStore;
use std::path::{Path, PathBuf};

pub struct KeyStoreFile {
    path: PathBuf,
}

impl KeyStoreFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the key store from disk.
    ///
    /// A missing file is a fresh install and yields an empty store. An
    /// unreadable or corrupt document also yields an empty store, loudly:
    /// the manager will re-initialize, and previously issued tokens stop
    /// validating at their natural expiry.
    pub async fn load(&self) -> Result<KeyStore, AuthError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(KeyStore::default());
            }
            Err(e) => {
                return Err(AuthError::Persistence(format!(
                    "failed to read key store {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(store) => Ok(store),
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "Key store document is corrupt; starting from an empty store"
                );
                Ok(KeyStore::default())
            }
        }
    }

    /// Persist the full key store atomically.
    pub async fn save(&self, store: &KeyStore) -> Result<(), AuthError> {
        let json = serde_json::to_vec_pretty(store)
            .map_err(|e| AuthError::Persistence(format!("failed to serialize key store: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    AuthError::Persistence(format!(
                        "failed to create key store directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json).await.map_err(|e| {
            AuthError::Persistence(format!(
                "failed to write key store {}: {}",
                tmp_path.display(),
                e
            ))
        })?;

        tokio::fs::rename(&tmp_path, &self.path).await.map_err(|e| {
            AuthError::Persistence(format!(
                "failed to commit key store {}: {}",
                self.path.display(),
                e
            ))
        })?;

        tracing::debug!(path = %self.path.display(), "Key store saved");
        Ok(())
    }
}
