use thiserror::Error;

/// Error taxonomy for the credential core.
///
/// Validation-class failures are distinguished internally (signature vs.
/// untrusted key vs. expiry) but collapse to one generic client-facing
/// message via [`AuthError::public_message`], so a caller relaying the
/// message cannot be used as an oracle for rotation or revocation state.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The key store holds no current signing key. Self-heals on the
    /// signing path by triggering an initial rotation.
    #[error("no active signing key available")]
    NoActiveKey,

    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// Signature verification failed, or the token's algorithm does not
    /// match the expected signing algorithm.
    #[error("invalid token signature")]
    InvalidSignature,

    /// The token names a `kid` that is not in the trusted key set.
    #[error("token signed with untrusted key: {0}")]
    UntrustedKeyId(String),

    /// The token is expired or not yet valid.
    #[error("token expired or not yet valid")]
    ExpiredToken,

    /// The token could not be parsed at all.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// Refresh-token lookup/activity failure. Deliberately covers
    /// not-found, expired, and revoked uniformly.
    #[error("invalid or expired refresh token")]
    InvalidOrExpiredRefreshToken,

    /// Explicit revocation targeted a token that does not exist or is
    /// already inactive.
    #[error("refresh token not found")]
    NotFound,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("account is locked out")]
    LockedOut,

    /// Durable-write failure. The operation that hit this has not been
    /// applied; in-memory state was left as it was before the call.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl AuthError {
    /// The message safe to relay to an external client.
    ///
    /// Every token-validation failure maps to the same string, and every
    /// refresh-ledger failure maps to the same string, regardless of the
    /// internal cause.
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthError::InvalidSignature
            | AuthError::UntrustedKeyId(_)
            | AuthError::ExpiredToken
            | AuthError::MalformedToken(_) => "The access token is invalid or expired",
            AuthError::InvalidOrExpiredRefreshToken | AuthError::NotFound => {
                "Invalid or expired refresh token"
            }
            AuthError::InvalidCredentials => "Invalid username or password",
            AuthError::LockedOut => "Account is locked out. Please try again later.",
            AuthError::NoActiveKey | AuthError::Crypto(_) | AuthError::Persistence(_) => {
                "An internal error occurred"
            }
        }
    }

    /// Whether the failure should surface as an unauthorized outcome
    /// rather than a server fault.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidSignature
                | AuthError::UntrustedKeyId(_)
                | AuthError::ExpiredToken
                | AuthError::MalformedToken(_)
                | AuthError::InvalidOrExpiredRefreshToken
                | AuthError::NotFound
                | AuthError::InvalidCredentials
                | AuthError::LockedOut
        )
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Persistence(format!("database error: {}", err))
    }
}
