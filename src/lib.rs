//! Multi-tenant API credential core.
//!
//! Three cooperating components:
//!
//! - [`services::key_rotation::KeyRotationManager`] — owns the RSA
//!   signing keys, rotates them on a validity schedule, and persists them
//!   (private halves wrapped with AES-256-GCM) in a whole-file JSON
//!   store. Retired keys stay trusted until their own expiry, so rotation
//!   never invalidates in-flight tokens.
//! - [`services::token_service::TokenIssuer`] — issues and validates
//!   RS256 access tokens, resolving the signing key by the `kid` header
//!   against the manager's trusted set.
//! - [`services::refresh_ledger::RefreshTokenLedger`] — single-use
//!   refresh tokens with revocation chains, backed by Postgres in
//!   production and an in-memory store for tests and embedding.
//!
//! [`services::auth_service::AuthService`] composes them into the login,
//! refresh, and logout flows; credential verification stays behind the
//! [`services::auth_service::UserAccounts`] seam.

pub mod config;
pub mod crypto;
pub mod errors;
pub mod keystore;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod services;

pub use config::Config;
pub use errors::AuthError;
