use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Private key material wrapped with AES-256-GCM under the master key.
///
/// The ciphertext carries the 16-byte authentication tag appended; both
/// fields are standard base64 so the key store document stays a plain
/// JSON file. Debug is redacted.
#[derive(Clone, Serialize, Deserialize)]
pub struct WrappedPrivateKey {
    pub nonce: String,
    pub ciphertext: String,
}

impl fmt::Debug for WrappedPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedPrivateKey")
            .field("nonce", &"[REDACTED]")
            .field("ciphertext", &"[REDACTED]")
            .finish()
    }
}

/// One signing key pair. Created on rotation, never mutated afterwards;
/// retention may remove it once expired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningKeyRecord {
    pub key_id: String,
    pub public_key_pem: String,
    pub private_key: WrappedPrivateKey,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub key_size: u32,
}

impl SigningKeyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Durable record of all known signing keys and which one is current.
///
/// Owned exclusively by the rotation manager and persisted whole-file as
/// the sole source of truth. `current_key_id == None` means the store is
/// uninitialized and a rotation must run before any issuance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyStore {
    pub current_key_id: Option<String>,
    pub keys: Vec<SigningKeyRecord>,
    pub last_rotation: Option<DateTime<Utc>>,
}

impl KeyStore {
    pub fn current_key(&self) -> Option<&SigningKeyRecord> {
        let current_id = self.current_key_id.as_deref()?;
        self.keys.iter().find(|k| k.key_id == current_id)
    }

    /// All keys still eligible to validate tokens, newest first. Includes
    /// retired-but-unexpired keys; this is what makes rotation transparent
    /// to holders of in-flight tokens.
    pub fn trusted_keys(&self, now: DateTime<Utc>) -> Vec<&SigningKeyRecord> {
        let mut keys: Vec<&SigningKeyRecord> =
            self.keys.iter().filter(|k| !k.is_expired(now)).collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        keys
    }
}

/// Public half of a signing key, as handed to validators and the JWKS
/// surface.
#[derive(Debug, Clone, Serialize)]
pub struct TrustedPublicKey {
    pub key_id: String,
    pub public_key_pem: String,
    pub expires_at: DateTime<Utc>,
}

/// JWKS response (RFC 7517).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<JsonWebKey>,
}

/// JSON Web Key (RFC 7517), RSA parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonWebKey {
    pub kid: String,
    pub kty: String, // "RSA"
    pub n: String,   // Modulus (base64url)
    pub e: String,   // Public exponent (base64url)
    #[serde(rename = "use")]
    pub use_: String, // "sig"
    pub alg: String, // "RS256"
}

/// One refresh token in a user's revocation chain (maps to the
/// refresh_tokens table).
///
/// Revocation is a state transition, not removal: a rotated-away record
/// stays in the table with its `replaced_by_token` pointer so reuse of a
/// dead token remains detectable. Only retention pruning deletes rows.
#[derive(Clone, FromRow, Serialize)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_value: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_by_ip: String,
    pub is_revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by_ip: Option<String>,
    pub replaced_by_token: Option<String>,
}

impl RefreshTokenRecord {
    /// A token is usable only while unrevoked and unexpired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && now < self.expires_at
    }
}

/// The token values are bearer secrets; Debug shows everything else.
impl fmt::Debug for RefreshTokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshTokenRecord")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("token_value", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("created_by_ip", &self.created_by_ip)
            .field("is_revoked", &self.is_revoked)
            .field("revoked_at", &self.revoked_at)
            .field("revoked_by_ip", &self.revoked_by_ip)
            .field(
                "replaced_by_token",
                &self.replaced_by_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Identity facts attached to issued tokens, provided by the external
/// user-account store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: Uuid,
    pub username: String,
    pub roles: Vec<String>,
}

/// Credential pair handed back on login and on refresh rotation.
#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub user: UserInfo,
}
