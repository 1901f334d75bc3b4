//! Session flows: login, refresh, logout.
//!
//! Password hashing, lockout counters, and account lifecycle live
//! outside this crate, behind the [`UserAccounts`] capability trait.
//! This service owns everything after the credential verdict: minting
//! the access/refresh pair, rotating it, and tearing sessions down.

use crate::errors::AuthError;
use crate::models::{LoginResponse, UserInfo};
use crate::services::refresh_ledger::RefreshTokenLedger;
use crate::services::token_service::TokenIssuer;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// External user-account store.
///
/// The implementor owns the password hashes and the lockout policy;
/// this crate only sequences the calls and converts verdicts into
/// credentials or errors.
#[async_trait]
pub trait UserAccounts: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserInfo>, AuthError>;

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<UserInfo>, AuthError>;

    async fn verify_password(&self, user_id: Uuid, password: &str) -> Result<bool, AuthError>;

    async fn is_locked_out(&self, user_id: Uuid) -> Result<bool, AuthError>;

    async fn record_failed_attempt(&self, user_id: Uuid) -> Result<(), AuthError>;

    async fn clear_failed_attempts(&self, user_id: Uuid) -> Result<(), AuthError>;
}

pub struct AuthService {
    accounts: Arc<dyn UserAccounts>,
    issuer: Arc<TokenIssuer>,
    ledger: Arc<RefreshTokenLedger>,
}

impl AuthService {
    pub fn new(
        accounts: Arc<dyn UserAccounts>,
        issuer: Arc<TokenIssuer>,
        ledger: Arc<RefreshTokenLedger>,
    ) -> Self {
        Self {
            accounts,
            issuer,
            ledger,
        }
    }

    /// Authenticate and establish a session.
    ///
    /// Lockout is checked before the password so a locked account cannot
    /// be password-probed; a wrong password records a failed attempt and
    /// re-checks lockout, so the attempt that crosses the threshold
    /// reports `LockedOut` rather than `InvalidCredentials`.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        client_ip: &str,
    ) -> Result<LoginResponse, AuthError> {
        let user = match self.accounts.find_by_username(username).await? {
            Some(user) => user,
            None => {
                tracing::warn!(client_ip, "Login rejected: unknown username");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if self.accounts.is_locked_out(user.user_id).await? {
            tracing::warn!(user_id = %user.user_id, client_ip, "Login rejected: account locked out");
            return Err(AuthError::LockedOut);
        }

        if !self.accounts.verify_password(user.user_id, password).await? {
            self.accounts.record_failed_attempt(user.user_id).await?;
            if self.accounts.is_locked_out(user.user_id).await? {
                tracing::warn!(
                    user_id = %user.user_id,
                    client_ip,
                    "Login rejected: failed attempt triggered lockout"
                );
                return Err(AuthError::LockedOut);
            }
            tracing::warn!(user_id = %user.user_id, client_ip, "Login rejected: invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        self.accounts.clear_failed_attempts(user.user_id).await?;

        let issued = self.issuer.issue_access_token(&user).await?;
        let refresh = self.ledger.issue_initial(user.user_id, client_ip).await?;

        tracing::info!(user_id = %user.user_id, client_ip, "Login succeeded");
        Ok(self.response(issued.token, refresh.token_value, user))
    }

    /// Exchange a presented refresh token for a fresh access/refresh pair.
    ///
    /// The access token is minted before the ledger claim: minting has no
    /// durable side effect, so a failed claim discards it harmlessly,
    /// while the claim itself is the single atomic transition. A vanished
    /// account gets the uniform refresh rejection.
    pub async fn refresh(
        &self,
        presented: &str,
        client_ip: &str,
    ) -> Result<LoginResponse, AuthError> {
        let existing = self.ledger.find_active(presented).await?;

        // Re-read the account so role changes since the last issuance
        // flow into the new token.
        let user = self
            .accounts
            .find_by_id(existing.user_id)
            .await?
            .ok_or(AuthError::InvalidOrExpiredRefreshToken)?;

        let issued = self.issuer.issue_access_token(&user).await?;
        let rotated = self.ledger.rotate(presented, client_ip).await?;

        tracing::info!(user_id = %user.user_id, client_ip, "Session refreshed");
        Ok(self.response(issued.token, rotated.replacement.token_value, user))
    }

    /// End one session by revoking its refresh token.
    pub async fn logout(&self, refresh_token: &str, client_ip: &str) -> Result<(), AuthError> {
        self.ledger.revoke(refresh_token, client_ip).await
    }

    /// End every session a user holds. Returns how many were revoked.
    pub async fn logout_everywhere(
        &self,
        user_id: Uuid,
        client_ip: &str,
    ) -> Result<u64, AuthError> {
        self.ledger.revoke_all_for_user(user_id, client_ip).await
    }

    fn response(
        &self,
        access_token: String,
        refresh_token: String,
        user: UserInfo,
    ) -> LoginResponse {
        LoginResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.issuer.access_token_lifetime().num_seconds().max(0) as u64,
            user,
        }
    }
}
