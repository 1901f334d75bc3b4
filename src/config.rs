use base64::{engine::general_purpose, Engine as _};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_SIGNING_KEY_SIZE: u32 = 2048;
pub const DEFAULT_SIGNING_KEY_VALIDITY_DAYS: i64 = 60;
pub const DEFAULT_KEY_RETENTION_COUNT: usize = 3;
pub const DEFAULT_ACCESS_TOKEN_LIFETIME_MINUTES: i64 = 60;
pub const DEFAULT_REFRESH_TOKEN_LIFETIME_DAYS: i64 = 7;
pub const DEFAULT_REFRESH_RETENTION_PER_USER: usize = 5;

/// Core configuration.
///
/// Fields are public so tests and embedding services can construct a
/// config directly; [`Config::from_env`] is the production path.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whole-file JSON document holding the signing-key store.
    pub key_store_path: PathBuf,
    /// 32-byte AES-256-GCM key wrapping private key material at rest.
    pub master_key: Vec<u8>,
    /// Connection string for the Postgres refresh-token store, when used.
    pub database_url: Option<String>,
    pub signing_key_size: u32,
    pub signing_key_validity_days: i64,
    /// Keys beyond this count are eligible for removal once expired.
    pub key_retention_count: usize,
    pub access_token_lifetime_minutes: i64,
    pub refresh_token_lifetime_days: i64,
    /// Refresh tokens kept per user; older rows are deleted outright.
    pub refresh_retention_per_user: usize,
    pub jwt_issuer: String,
    pub jwt_audience: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid master key format: {0}")]
    InvalidMasterKey(String),

    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("Invalid value for {var}: {value}")]
    InvalidNumber { var: String, value: String },
}

fn parse_var<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    var: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(var) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidNumber {
            var: var.to_string(),
            value: raw.clone(),
        }),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let key_store_path = vars
            .get("AUTH_KEY_STORE_PATH")
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("AUTH_KEY_STORE_PATH".to_string()))?;

        let master_key_base64 = vars
            .get("AUTH_MASTER_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("AUTH_MASTER_KEY".to_string()))?;

        let master_key = general_purpose::STANDARD
            .decode(master_key_base64)
            .map_err(ConfigError::Base64Error)?;

        if master_key.len() != 32 {
            return Err(ConfigError::InvalidMasterKey(format!(
                "Expected 32 bytes, got {}",
                master_key.len()
            )));
        }

        Ok(Config {
            key_store_path,
            master_key,
            database_url: vars.get("DATABASE_URL").cloned(),
            signing_key_size: parse_var(vars, "AUTH_SIGNING_KEY_SIZE", DEFAULT_SIGNING_KEY_SIZE)?,
            signing_key_validity_days: parse_var(
                vars,
                "AUTH_SIGNING_KEY_VALIDITY_DAYS",
                DEFAULT_SIGNING_KEY_VALIDITY_DAYS,
            )?,
            key_retention_count: parse_var(
                vars,
                "AUTH_KEY_RETENTION_COUNT",
                DEFAULT_KEY_RETENTION_COUNT,
            )?,
            access_token_lifetime_minutes: parse_var(
                vars,
                "AUTH_ACCESS_TOKEN_LIFETIME_MINUTES",
                DEFAULT_ACCESS_TOKEN_LIFETIME_MINUTES,
            )?,
            refresh_token_lifetime_days: parse_var(
                vars,
                "AUTH_REFRESH_TOKEN_LIFETIME_DAYS",
                DEFAULT_REFRESH_TOKEN_LIFETIME_DAYS,
            )?,
            refresh_retention_per_user: parse_var(
                vars,
                "AUTH_REFRESH_RETENTION_PER_USER",
                DEFAULT_REFRESH_RETENTION_PER_USER,
            )?,
            jwt_issuer: vars
                .get("AUTH_JWT_ISSUER")
                .cloned()
                .unwrap_or_else(|| "token-authority".to_string()),
            jwt_audience: vars
                .get("AUTH_JWT_AUDIENCE")
                .cloned()
                .unwrap_or_else(|| "api".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_master_key_base64() -> String {
        general_purpose::STANDARD.encode([0u8; 32])
    }

    fn required_vars() -> HashMap<String, String> {
        HashMap::from([
            ("AUTH_KEY_STORE_PATH".to_string(), "/tmp/keys.json".to_string()),
            ("AUTH_MASTER_KEY".to_string(), test_master_key_base64()),
        ])
    }

    #[test]
    fn test_from_vars_defaults() -> Result<(), ConfigError> {
        let config = Config::from_vars(&required_vars())?;

        assert_eq!(config.key_store_path, PathBuf::from("/tmp/keys.json"));
        assert_eq!(config.master_key.len(), 32);
        assert_eq!(config.signing_key_size, 2048);
        assert_eq!(config.signing_key_validity_days, 60);
        assert_eq!(config.key_retention_count, 3);
        assert_eq!(config.access_token_lifetime_minutes, 60);
        assert_eq!(config.refresh_token_lifetime_days, 7);
        assert_eq!(config.refresh_retention_per_user, 5);
        assert_eq!(config.jwt_issuer, "token-authority");
        assert_eq!(config.jwt_audience, "api");
        assert_eq!(config.database_url, None);
        Ok(())
    }

    #[test]
    fn test_from_vars_overrides() -> Result<(), ConfigError> {
        let mut vars = required_vars();
        vars.insert("AUTH_SIGNING_KEY_SIZE".to_string(), "3072".to_string());
        vars.insert("AUTH_ACCESS_TOKEN_LIFETIME_MINUTES".to_string(), "15".to_string());
        vars.insert("AUTH_REFRESH_RETENTION_PER_USER".to_string(), "10".to_string());
        vars.insert("AUTH_JWT_ISSUER".to_string(), "issuer.example".to_string());
        vars.insert(
            "DATABASE_URL".to_string(),
            "postgresql://localhost/auth".to_string(),
        );

        let config = Config::from_vars(&vars)?;

        assert_eq!(config.signing_key_size, 3072);
        assert_eq!(config.access_token_lifetime_minutes, 15);
        assert_eq!(config.refresh_retention_per_user, 10);
        assert_eq!(config.jwt_issuer, "issuer.example");
        assert_eq!(
            config.database_url,
            Some("postgresql://localhost/auth".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_from_vars_missing_key_store_path() {
        let vars = HashMap::from([("AUTH_MASTER_KEY".to_string(), test_master_key_base64())]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "AUTH_KEY_STORE_PATH"));
    }

    #[test]
    fn test_from_vars_missing_master_key() {
        let vars = HashMap::from([(
            "AUTH_KEY_STORE_PATH".to_string(),
            "/tmp/keys.json".to_string(),
        )]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "AUTH_MASTER_KEY"));
    }

    #[test]
    fn test_from_vars_invalid_base64() {
        let mut vars = required_vars();
        vars.insert("AUTH_MASTER_KEY".to_string(), "not-valid-base64!@#$".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::Base64Error(_))));
    }

    #[test]
    fn test_from_vars_master_key_wrong_length() {
        let mut vars = required_vars();
        vars.insert(
            "AUTH_MASTER_KEY".to_string(),
            general_purpose::STANDARD.encode([0u8; 16]),
        );

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidMasterKey(msg)) if msg.contains("Expected 32 bytes, got 16"))
        );
    }

    #[test]
    fn test_from_vars_invalid_number() {
        let mut vars = required_vars();
        vars.insert("AUTH_KEY_RETENTION_COUNT".to_string(), "three".to_string());

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidNumber { var, value }) if var == "AUTH_KEY_RETENTION_COUNT" && value == "three")
        );
    }
}
