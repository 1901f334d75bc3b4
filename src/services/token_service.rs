//! Access-token issuance and validation.
//!
//! Issuance always signs with the rotation manager's current key and
//! stamps the header with its `kid`. Validation resolves the `kid`
//! against the trusted set before any signature work, so an unknown key
//! id costs one header parse and nothing more.

use crate::config::Config;
use crate::crypto::{self, Claims, TokenExpectations};
use crate::errors::AuthError;
use crate::models::UserInfo;
use crate::observability::metrics::{record_token_issuance, record_token_validation};
use crate::services::key_rotation::KeyRotationManager;
use chrono::{Duration, Utc};
use jsonwebtoken::Algorithm;
use std::sync::Arc;
use uuid::Uuid;

/// A freshly signed access token plus the metadata callers track.
#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    pub token: String,
    pub jti: String,
    pub expires_at: chrono::DateTime<Utc>,
}

pub struct TokenIssuer {
    keys: Arc<KeyRotationManager>,
    expectations: TokenExpectations,
    access_token_lifetime: Duration,
}

impl TokenIssuer {
    pub fn new(keys: Arc<KeyRotationManager>, config: &Config) -> Self {
        Self {
            keys,
            expectations: TokenExpectations {
                issuer: config.jwt_issuer.clone(),
                audience: config.jwt_audience.clone(),
            },
            access_token_lifetime: Duration::minutes(config.access_token_lifetime_minutes),
        }
    }

    pub fn access_token_lifetime(&self) -> Duration {
        self.access_token_lifetime
    }

    /// Issue an RS256 access token for the given user.
    ///
    /// Triggers a synchronous key rotation when the store has no usable
    /// current key, so the first issuance after a cold start succeeds.
    pub async fn issue_access_token(
        &self,
        user: &UserInfo,
    ) -> Result<IssuedAccessToken, AuthError> {
        let signing_key = match self.keys.current_signing_key().await {
            Ok(key) => key,
            Err(e) => {
                record_token_issuance("error");
                return Err(e);
            }
        };

        let now = Utc::now();
        let expires_at = now + self.access_token_lifetime;
        let claims = Claims {
            sub: user.user_id.to_string(),
            name: user.username.clone(),
            jti: Uuid::new_v4().to_string(),
            roles: user.roles.clone(),
            iss: self.expectations.issuer.clone(),
            aud: self.expectations.audience.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        match crypto::sign_jwt(&claims, &signing_key.private_key_pem, &signing_key.key_id) {
            Ok(token) => {
                record_token_issuance("success");
                tracing::debug!(
                    user_id = %user.user_id,
                    key_id = %signing_key.key_id,
                    jti = %claims.jti,
                    "Issued access token"
                );
                Ok(IssuedAccessToken {
                    token,
                    jti: claims.jti,
                    expires_at,
                })
            }
            Err(e) => {
                record_token_issuance("error");
                Err(e)
            }
        }
    }

    /// Mint an opaque refresh secret: 512 bits of CSPRNG output, base64.
    ///
    /// The secret carries no claims and is never signed; possession is the
    /// whole capability, and the ledger is what gives it meaning.
    pub fn issue_refresh_secret(&self) -> Result<String, AuthError> {
        crypto::generate_refresh_secret()
    }

    /// Validate an access token fully: size cap, algorithm, `kid` lookup,
    /// signature, issuer/audience, and lifetime.
    pub async fn validate_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.validate(token, true).await
    }

    /// Extract claims from a token whose lifetime may have elapsed.
    ///
    /// Signature, algorithm, `kid`, issuer, and audience checks still
    /// apply in full; only `exp`/`nbf` are skipped. This is the refresh
    /// flow's way of learning who is asking without accepting the expired
    /// token as proof of anything else.
    pub async fn claims_from_expired_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.validate(token, false).await
    }

    async fn validate(&self, token: &str, validate_lifetime: bool) -> Result<Claims, AuthError> {
        match self.validate_inner(token, validate_lifetime).await {
            Ok(claims) => {
                record_token_validation("success", None);
                Ok(claims)
            }
            Err(e) => {
                record_token_validation("error", Some(validation_error_category(&e)));
                tracing::debug!(error = %e, "Access token rejected");
                Err(e)
            }
        }
    }

    async fn validate_inner(
        &self,
        token: &str,
        validate_lifetime: bool,
    ) -> Result<Claims, AuthError> {
        let header = crypto::parse_unverified_header(token)?;

        // Algorithm substitution is rejected before any key lookup.
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::InvalidSignature);
        }

        let kid = header
            .kid
            .ok_or_else(|| AuthError::MalformedToken("missing kid header".to_string()))?;

        let trusted = self.keys.trusted_public_keys().await;
        let key = trusted
            .iter()
            .find(|k| k.key_id == kid)
            .ok_or_else(|| AuthError::UntrustedKeyId(kid.clone()))?;

        crypto::verify_jwt(
            token,
            &key.public_key_pem,
            &self.expectations,
            validate_lifetime,
        )
    }
}

fn validation_error_category(err: &AuthError) -> &'static str {
    match err {
        AuthError::InvalidSignature => "signature",
        AuthError::UntrustedKeyId(_) => "untrusted_key",
        AuthError::ExpiredToken => "expired",
        AuthError::MalformedToken(_) => "malformed",
        _ => "other",
    }
}
