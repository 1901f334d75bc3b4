//! Signing-key rotation.
//!
//! The manager is the only component that reads or writes key material.
//! It keeps the [`KeyStore`] behind a `RwLock`: validation paths share
//! read access, while a rotation holds the write guard across the whole
//! generate → mutate → persist sequence, so no reader ever observes a
//! half-applied rotation and two rotations can never interleave.
//!
//! Rotation mutates a clone of the store and commits it to memory only
//! after the file write succeeds. A failed persist therefore leaves both
//! the document and the in-memory state exactly as they were.

use crate::config::Config;
use crate::crypto;
use crate::errors::AuthError;
use crate::keystore::KeyStoreFile;
use crate::models::{Jwks, JsonWebKey, KeyStore, SigningKeyRecord, TrustedPublicKey};
use crate::observability::metrics::{record_key_rotation, set_trusted_signing_keys};
use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use tokio::sync::RwLock;
use uuid::Uuid;

/// The current key's identity and unwrapped private material, handed to
/// the token issuer for one signing operation.
pub struct CurrentSigningKey {
    pub key_id: String,
    pub private_key_pem: SecretString,
}

pub struct KeyRotationManager {
    store: RwLock<KeyStore>,
    persistence: KeyStoreFile,
    master_key: Vec<u8>,
    default_key_size: u32,
    key_validity: Duration,
    keep_count: usize,
}

impl KeyRotationManager {
    /// Load the manager from the configured key store document.
    ///
    /// Does not rotate eagerly; an uninitialized store self-heals on the
    /// first signing request, or when the scheduler calls
    /// [`KeyRotationManager::rotate_key`].
    pub async fn load(config: &Config) -> Result<Self, AuthError> {
        let persistence = KeyStoreFile::new(&config.key_store_path);
        let store = persistence.load().await?;

        if let Some(current) = store.current_key() {
            tracing::info!(
                key_id = %current.key_id,
                keys = store.keys.len(),
                "Loaded key store"
            );
        } else {
            tracing::info!("Loaded empty key store; first use will generate a signing key");
        }

        Ok(Self {
            store: RwLock::new(store),
            persistence,
            master_key: config.master_key.clone(),
            default_key_size: config.signing_key_size,
            key_validity: Duration::days(config.signing_key_validity_days),
            keep_count: config.key_retention_count,
        })
    }

    /// Generate a fresh keypair, make it current, and persist the store.
    ///
    /// The prior current key is demoted but stays trusted until its own
    /// expiry, which is what keeps in-flight tokens validating across a
    /// rotation. Concurrent calls serialize on the write lock.
    pub async fn rotate_key(&self, key_size: Option<u32>) -> Result<SigningKeyRecord, AuthError> {
        let key_size = key_size.unwrap_or(self.default_key_size);
        let mut guard = self.store.write().await;
        self.rotate_locked(&mut guard, key_size).await
    }

    async fn rotate_locked(
        &self,
        store: &mut KeyStore,
        key_size: u32,
    ) -> Result<SigningKeyRecord, AuthError> {
        tracing::info!(key_size, "Starting key rotation");

        // RSA generation is CPU-heavy; keep it off the async workers.
        let (public_key_pem, private_key_pem) =
            tokio::task::spawn_blocking(move || crypto::generate_rsa_keypair(key_size))
                .await
                .map_err(|e| AuthError::Crypto(format!("key generation task failed: {}", e)))??;

        let wrapped = crypto::wrap_private_key(&private_key_pem, &self.master_key)?;

        let now = Utc::now();
        let record = SigningKeyRecord {
            key_id: Uuid::new_v4().to_string(),
            public_key_pem,
            private_key: wrapped,
            created_at: now,
            expires_at: now + self.key_validity,
            key_size,
        };

        let mut next = store.clone();
        next.current_key_id = Some(record.key_id.clone());
        next.keys.push(record.clone());
        next.last_rotation = Some(now);
        prune_keys(&mut next, self.keep_count, now);

        if let Err(e) = self.persistence.save(&next).await {
            record_key_rotation("error");
            tracing::error!(error = %e, "Key rotation failed to persist; in-memory store unchanged");
            return Err(e);
        }

        *store = next;
        record_key_rotation("success");
        set_trusted_signing_keys(store.trusted_keys(now).len() as u64);
        tracing::info!(
            key_id = %record.key_id,
            expires_at = %record.expires_at,
            "Key rotation completed"
        );
        Ok(record)
    }

    /// The current key with unwrapped private material.
    ///
    /// Self-heals when the store is uninitialized or the current key has
    /// expired: the first caller through the write lock rotates, later
    /// callers observe its result.
    pub async fn current_signing_key(&self) -> Result<CurrentSigningKey, AuthError> {
        {
            let guard = self.store.read().await;
            if let Some(key) = guard.current_key() {
                if !key.is_expired(Utc::now()) {
                    return self.unwrap_signing_key(key);
                }
            }
        }

        let mut guard = self.store.write().await;
        let now = Utc::now();
        let needs_rotation = match guard.current_key() {
            Some(key) => key.is_expired(now),
            None => true,
        };
        if needs_rotation {
            tracing::warn!("No usable signing key; rotating synchronously on first use");
            self.rotate_locked(&mut guard, self.default_key_size).await?;
        }

        let key = guard.current_key().ok_or(AuthError::NoActiveKey)?;
        self.unwrap_signing_key(key)
    }

    fn unwrap_signing_key(&self, key: &SigningKeyRecord) -> Result<CurrentSigningKey, AuthError> {
        let private_key_pem = crypto::unwrap_private_key(&key.private_key, &self.master_key)?;
        Ok(CurrentSigningKey {
            key_id: key.key_id.clone(),
            private_key_pem,
        })
    }

    /// The current key's public half. Fails with [`AuthError::NoActiveKey`]
    /// when the store has never been initialized.
    pub async fn current_public_key(&self) -> Result<TrustedPublicKey, AuthError> {
        let guard = self.store.read().await;
        let key = guard.current_key().ok_or(AuthError::NoActiveKey)?;
        Ok(public_view(key))
    }

    /// Every key still eligible for validation, newest first: the current
    /// key plus retired-but-unexpired predecessors.
    pub async fn trusted_public_keys(&self) -> Vec<TrustedPublicKey> {
        let guard = self.store.read().await;
        guard
            .trusted_keys(Utc::now())
            .into_iter()
            .map(public_view)
            .collect()
    }

    pub async fn current_key_id(&self) -> Option<String> {
        let guard = self.store.read().await;
        guard.current_key().map(|k| k.key_id.clone())
    }

    pub async fn last_rotation(&self) -> Option<DateTime<Utc>> {
        let guard = self.store.read().await;
        guard.last_rotation
    }

    /// RFC 7517 key set over the trusted keys, for a public discovery
    /// endpoint.
    pub async fn jwks(&self) -> Result<Jwks, AuthError> {
        let trusted = self.trusted_public_keys().await;
        let mut keys = Vec::with_capacity(trusted.len());
        for key in trusted {
            let (n, e) = crypto::rsa_jwk_components(&key.public_key_pem)?;
            keys.push(JsonWebKey {
                kid: key.key_id,
                kty: "RSA".to_string(),
                n,
                e,
                use_: "sig".to_string(),
                alg: "RS256".to_string(),
            });
        }
        Ok(Jwks { keys })
    }

    /// Clone of the full store, for admin inspection and tests. Private
    /// material in the snapshot stays wrapped.
    pub async fn snapshot(&self) -> KeyStore {
        self.store.read().await.clone()
    }
}

fn public_view(key: &SigningKeyRecord) -> TrustedPublicKey {
    TrustedPublicKey {
        key_id: key.key_id.clone(),
        public_key_pem: key.public_key_pem.clone(),
        expires_at: key.expires_at,
    }
}

/// Retention: the `keep_count` newest keys are kept outright; beyond
/// that, only keys already past their own expiry are removed. An old but
/// unexpired key may still be validating in-flight tokens, so count-based
/// retention is advisory and expiry-based retention is authoritative.
fn prune_keys(store: &mut KeyStore, keep_count: usize, now: DateTime<Utc>) {
    if store.keys.len() <= keep_count {
        return;
    }

    let mut by_recency: Vec<(String, DateTime<Utc>)> = store
        .keys
        .iter()
        .map(|k| (k.key_id.clone(), k.created_at))
        .collect();
    by_recency.sort_by(|a, b| b.1.cmp(&a.1));

    let removable: Vec<String> = by_recency
        .iter()
        .skip(keep_count)
        .map(|(id, _)| id.clone())
        .filter(|id| {
            store
                .keys
                .iter()
                .any(|k| &k.key_id == id && k.is_expired(now))
        })
        .collect();

    if removable.is_empty() {
        return;
    }

    store.keys.retain(|k| !removable.contains(&k.key_id));
    for key_id in &removable {
        tracing::info!(%key_id, "Removed expired signing key");
    }
}
