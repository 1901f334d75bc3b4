//! Refresh-token persistence.
//!
//! The ledger only needs transactional read/write/delete on one keyed
//! table; the trait below is that contract. [`postgres`] is the
//! production implementation, [`memory`] backs tests and embedded use.

pub mod memory;
pub mod postgres;

use crate::errors::AuthError;
use crate::models::RefreshTokenRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Metadata stamped onto a record when it is revoked.
#[derive(Debug, Clone)]
pub struct Revocation {
    pub at: DateTime<Utc>,
    pub by_ip: String,
}

/// Storage contract for refresh-token records.
///
/// `rotate` and `revoke` must be serializable per `token_value`: of two
/// concurrent calls claiming the same active row, exactly one may win and
/// the other must observe the already-revoked state.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Insert a fresh record and, in the same transaction, delete all but
    /// the `keep` most-recently-created rows for that user.
    async fn insert_and_prune(
        &self,
        record: RefreshTokenRecord,
        keep: usize,
    ) -> Result<(), AuthError>;

    async fn find_by_value(
        &self,
        token_value: &str,
    ) -> Result<Option<RefreshTokenRecord>, AuthError>;

    /// Atomically claim the presented row (revoke it, chain it to the
    /// replacement) and insert the replacement.
    ///
    /// Returns the revoked predecessor, or `None` when the row was
    /// missing, expired, or already revoked — in which case nothing was
    /// written.
    async fn rotate(
        &self,
        presented: &str,
        revocation: Revocation,
        replacement: RefreshTokenRecord,
    ) -> Result<Option<RefreshTokenRecord>, AuthError>;

    /// Revoke one active row without replacement. Returns false when the
    /// row was missing or already inactive.
    async fn revoke(&self, token_value: &str, revocation: Revocation) -> Result<bool, AuthError>;

    /// Revoke every active row for a user. Returns the number revoked.
    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        revocation: Revocation,
    ) -> Result<u64, AuthError>;

    /// All rows for a user, newest first. Includes revoked rows still
    /// inside the retention window.
    async fn find_for_user(&self, user_id: Uuid) -> Result<Vec<RefreshTokenRecord>, AuthError>;
}
