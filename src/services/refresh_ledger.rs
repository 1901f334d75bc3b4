//! Refresh-token ledger: single-use rotation with revocation chains.
//!
//! Every failure on the rotation path collapses to
//! [`AuthError::InvalidOrExpiredRefreshToken`], so a caller probing with
//! stolen or guessed values learns nothing about whether a token ever
//! existed, expired, or was rotated away. Log lines carry only SHA-256
//! fingerprints of token values.

use crate::config::Config;
use crate::crypto;
use crate::errors::AuthError;
use crate::models::RefreshTokenRecord;
use crate::observability::metrics::{record_refresh_revocation, record_refresh_rotation};
use crate::repositories::{RefreshTokenStore, Revocation};
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of a successful rotation: the revoked predecessor (with its
/// chain pointer set) and its live replacement.
#[derive(Debug, Clone)]
pub struct RotatedRefreshToken {
    pub revoked: RefreshTokenRecord,
    pub replacement: RefreshTokenRecord,
}

pub struct RefreshTokenLedger {
    store: Arc<dyn RefreshTokenStore>,
    token_lifetime: Duration,
    retention_per_user: usize,
}

impl RefreshTokenLedger {
    pub fn new(store: Arc<dyn RefreshTokenStore>, config: &Config) -> Self {
        Self {
            store,
            token_lifetime: Duration::days(config.refresh_token_lifetime_days),
            retention_per_user: config.refresh_retention_per_user,
        }
    }

    fn mint_record(&self, user_id: Uuid, client_ip: &str) -> Result<RefreshTokenRecord, AuthError> {
        let now = Utc::now();
        Ok(RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id,
            token_value: crypto::generate_refresh_secret()?,
            created_at: now,
            expires_at: now + self.token_lifetime,
            created_by_ip: client_ip.to_string(),
            is_revoked: false,
            revoked_at: None,
            revoked_by_ip: None,
            replaced_by_token: None,
        })
    }

    /// Issue the first refresh token of a session (the login path).
    ///
    /// Inserting also prunes the user's oldest rows past the retention
    /// cap, so the ledger stays bounded per user.
    pub async fn issue_initial(
        &self,
        user_id: Uuid,
        client_ip: &str,
    ) -> Result<RefreshTokenRecord, AuthError> {
        let record = self.mint_record(user_id, client_ip)?;
        self.store
            .insert_and_prune(record.clone(), self.retention_per_user)
            .await?;

        tracing::info!(
            %user_id,
            token = %crypto::token_fingerprint(&record.token_value),
            "Issued refresh token"
        );
        Ok(record)
    }

    /// Rotate a presented refresh token: revoke it, chain it to a fresh
    /// replacement, and return both ends of the transition.
    ///
    /// Single-use is enforced by the store's conditional claim; of two
    /// concurrent rotations of the same value, exactly one succeeds and
    /// the loser gets the same uniform error as any other invalid token.
    pub async fn rotate(
        &self,
        presented: &str,
        client_ip: &str,
    ) -> Result<RotatedRefreshToken, AuthError> {
        let now = Utc::now();

        // Resolve the owner first; the replacement row must be minted
        // before the claim so the chain pointer can be written with it.
        let existing = self.store.find_by_value(presented).await?;
        let existing = match existing {
            Some(row) => row,
            None => {
                record_refresh_rotation("rejected");
                tracing::warn!(
                    token = %crypto::token_fingerprint(presented),
                    "Refresh rotation rejected: unknown token"
                );
                return Err(AuthError::InvalidOrExpiredRefreshToken);
            }
        };

        let replacement = self.mint_record(existing.user_id, client_ip)?;
        let revocation = Revocation {
            at: now,
            by_ip: client_ip.to_string(),
        };

        let claimed = self
            .store
            .rotate(presented, revocation, replacement.clone())
            .await?;

        match claimed {
            Some(predecessor) => {
                record_refresh_rotation("success");
                tracing::info!(
                    user_id = %predecessor.user_id,
                    old = %crypto::token_fingerprint(presented),
                    new = %crypto::token_fingerprint(&replacement.token_value),
                    "Rotated refresh token"
                );
                Ok(RotatedRefreshToken {
                    revoked: predecessor,
                    replacement,
                })
            }
            None => {
                // Lost the race, or the row went inactive between lookup
                // and claim. Indistinguishable from any other rejection.
                record_refresh_rotation("rejected");
                tracing::warn!(
                    user_id = %existing.user_id,
                    token = %crypto::token_fingerprint(presented),
                    "Refresh rotation rejected: token inactive or already claimed"
                );
                Err(AuthError::InvalidOrExpiredRefreshToken)
            }
        }
    }

    /// Explicitly revoke one active token (the logout path).
    ///
    /// Unlike rotation, this is an authenticated management action, so a
    /// miss surfaces as [`AuthError::NotFound`] rather than silently
    /// succeeding.
    pub async fn revoke(&self, token_value: &str, client_ip: &str) -> Result<(), AuthError> {
        let revocation = Revocation {
            at: Utc::now(),
            by_ip: client_ip.to_string(),
        };

        if self.store.revoke(token_value, revocation).await? {
            record_refresh_revocation("single", 1);
            tracing::info!(
                token = %crypto::token_fingerprint(token_value),
                "Revoked refresh token"
            );
            Ok(())
        } else {
            Err(AuthError::NotFound)
        }
    }

    /// Revoke every active token a user holds, across all devices.
    pub async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        client_ip: &str,
    ) -> Result<u64, AuthError> {
        let revocation = Revocation {
            at: Utc::now(),
            by_ip: client_ip.to_string(),
        };

        let revoked = self.store.revoke_all_for_user(user_id, revocation).await?;
        if revoked > 0 {
            record_refresh_revocation("user", revoked);
        }
        tracing::info!(%user_id, revoked, "Revoked all refresh tokens for user");
        Ok(revoked)
    }

    /// The user's ledger rows, newest first, revoked rows included.
    pub async fn tokens_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<RefreshTokenRecord>, AuthError> {
        self.store.find_for_user(user_id).await
    }

    /// Look up an active record by value. Inactive and unknown values are
    /// uniformly rejected.
    pub async fn find_active(&self, token_value: &str) -> Result<RefreshTokenRecord, AuthError> {
        let row = self.store.find_by_value(token_value).await?;
        match row {
            Some(record) if record.is_active(Utc::now()) => Ok(record),
            _ => Err(AuthError::InvalidOrExpiredRefreshToken),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::InMemoryRefreshTokenStore;
    use std::path::PathBuf;

    fn test_config() -> Config {
        Config {
            key_store_path: PathBuf::from("/unused/keys.json"),
            master_key: vec![7u8; 32],
            database_url: None,
            signing_key_size: 2048,
            signing_key_validity_days: 60,
            key_retention_count: 3,
            access_token_lifetime_minutes: 60,
            refresh_token_lifetime_days: 7,
            refresh_retention_per_user: 5,
            jwt_issuer: "token-authority".to_string(),
            jwt_audience: "api".to_string(),
        }
    }

    fn test_ledger() -> (RefreshTokenLedger, Arc<InMemoryRefreshTokenStore>) {
        let store = Arc::new(InMemoryRefreshTokenStore::new());
        let ledger = RefreshTokenLedger::new(store.clone(), &test_config());
        (ledger, store)
    }

    #[tokio::test]
    async fn issue_creates_active_record() -> anyhow::Result<()> {
        let (ledger, _) = test_ledger();
        let user_id = Uuid::new_v4();

        let record = ledger.issue_initial(user_id, "10.0.0.1").await?;

        assert!(record.is_active(Utc::now()));
        assert_eq!(record.user_id, user_id);
        assert_eq!(record.created_by_ip, "10.0.0.1");
        assert_eq!(record.token_value.len(), 88);
        Ok(())
    }

    #[tokio::test]
    async fn rotation_revokes_and_chains() -> anyhow::Result<()> {
        let (ledger, _) = test_ledger();
        let user_id = Uuid::new_v4();

        let original = ledger.issue_initial(user_id, "10.0.0.1").await?;
        let rotated = ledger.rotate(&original.token_value, "10.0.0.2").await?;

        assert_ne!(original.token_value, rotated.replacement.token_value);
        assert_eq!(rotated.replacement.user_id, user_id);

        // The predecessor is revoked and points at its successor.
        assert!(rotated.revoked.is_revoked);
        assert_eq!(rotated.revoked.token_value, original.token_value);
        assert_eq!(rotated.revoked.revoked_by_ip.as_deref(), Some("10.0.0.2"));
        assert_eq!(
            rotated.revoked.replaced_by_token.as_deref(),
            Some(rotated.replacement.token_value.as_str())
        );

        // The stored row reflects the same transition.
        let rows = ledger.tokens_for_user(user_id).await?;
        let stored = rows
            .iter()
            .find(|r| r.token_value == original.token_value)
            .ok_or_else(|| anyhow::anyhow!("predecessor row missing"))?;
        assert!(stored.is_revoked);
        Ok(())
    }

    #[tokio::test]
    async fn rotated_token_cannot_be_used_again() -> anyhow::Result<()> {
        let (ledger, _) = test_ledger();
        let user_id = Uuid::new_v4();

        let original = ledger.issue_initial(user_id, "10.0.0.1").await?;
        ledger.rotate(&original.token_value, "10.0.0.1").await?;

        let reuse = ledger.rotate(&original.token_value, "10.0.0.1").await;
        assert!(matches!(reuse, Err(AuthError::InvalidOrExpiredRefreshToken)));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_and_revoked_tokens_fail_identically() -> anyhow::Result<()> {
        let (ledger, _) = test_ledger();
        let user_id = Uuid::new_v4();

        let original = ledger.issue_initial(user_id, "10.0.0.1").await?;
        ledger.revoke(&original.token_value, "10.0.0.1").await?;

        let revoked = ledger.rotate(&original.token_value, "10.0.0.1").await;
        let unknown = ledger.rotate("never-issued", "10.0.0.1").await;

        let revoked_msg = match revoked {
            Err(e) => e.public_message(),
            Ok(_) => anyhow::bail!("revoked token rotated"),
        };
        let unknown_msg = match unknown {
            Err(e) => e.public_message(),
            Ok(_) => anyhow::bail!("unknown token rotated"),
        };
        assert_eq!(revoked_msg, unknown_msg);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_rotation_has_one_winner() -> anyhow::Result<()> {
        let (ledger, _) = test_ledger();
        let ledger = Arc::new(ledger);
        let user_id = Uuid::new_v4();

        let original = ledger.issue_initial(user_id, "10.0.0.1").await?;

        let mut tasks = Vec::new();
        for i in 0..8 {
            let ledger = Arc::clone(&ledger);
            let value = original.token_value.clone();
            tasks.push(tokio::spawn(async move {
                ledger.rotate(&value, &format!("10.0.0.{}", i)).await
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await?.is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        Ok(())
    }

    #[tokio::test]
    async fn retention_keeps_newest_per_user() -> anyhow::Result<()> {
        let store = Arc::new(InMemoryRefreshTokenStore::new());
        let mut config = test_config();
        config.refresh_retention_per_user = 3;
        let ledger = RefreshTokenLedger::new(store, &config);

        let user_id = Uuid::new_v4();
        let other_user = Uuid::new_v4();
        let other_record = ledger.issue_initial(other_user, "10.0.0.9").await?;

        let mut issued = Vec::new();
        for _ in 0..5 {
            issued.push(ledger.issue_initial(user_id, "10.0.0.1").await?);
            // Distinct created_at ordering.
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let rows = ledger.tokens_for_user(user_id).await?;
        assert_eq!(rows.len(), 3);
        let kept: Vec<&str> = rows.iter().map(|r| r.token_value.as_str()).collect();
        for newest in issued.iter().rev().take(3) {
            assert!(kept.contains(&newest.token_value.as_str()));
        }

        // Another user's ledger is untouched.
        let other_rows = ledger.tokens_for_user(other_user).await?;
        assert_eq!(
            other_rows.first().map(|r| r.token_value.as_str()),
            Some(other_record.token_value.as_str())
        );
        Ok(())
    }

    #[tokio::test]
    async fn revoke_requires_an_active_record() -> anyhow::Result<()> {
        let (ledger, _) = test_ledger();
        let user_id = Uuid::new_v4();

        let record = ledger.issue_initial(user_id, "10.0.0.1").await?;
        ledger.revoke(&record.token_value, "10.0.0.1").await?;

        // Second revoke of the same token, and revoke of a stranger.
        let again = ledger.revoke(&record.token_value, "10.0.0.1").await;
        assert!(matches!(again, Err(AuthError::NotFound)));
        let missing = ledger.revoke("never-issued", "10.0.0.1").await;
        assert!(matches!(missing, Err(AuthError::NotFound)));
        Ok(())
    }

    #[tokio::test]
    async fn revoke_all_sweeps_only_active_rows() -> anyhow::Result<()> {
        let (ledger, _) = test_ledger();
        let user_id = Uuid::new_v4();

        let first = ledger.issue_initial(user_id, "10.0.0.1").await?;
        ledger.issue_initial(user_id, "10.0.0.2").await?;
        ledger.revoke(&first.token_value, "10.0.0.1").await?;

        let revoked = ledger.revoke_all_for_user(user_id, "10.0.0.3").await?;
        assert_eq!(revoked, 1);

        let rows = ledger.tokens_for_user(user_id).await?;
        assert!(rows.iter().all(|r| r.is_revoked));
        Ok(())
    }

    #[tokio::test]
    async fn find_active_rejects_inactive_uniformly() -> anyhow::Result<()> {
        let (ledger, _) = test_ledger();
        let user_id = Uuid::new_v4();

        let record = ledger.issue_initial(user_id, "10.0.0.1").await?;
        let found = ledger.find_active(&record.token_value).await?;
        assert_eq!(found.id, record.id);

        ledger.revoke(&record.token_value, "10.0.0.1").await?;
        let gone = ledger.find_active(&record.token_value).await;
        assert!(matches!(gone, Err(AuthError::InvalidOrExpiredRefreshToken)));
        Ok(())
    }
}
