//! Metric recorders for the credential core.
//!
//! Prometheus naming conventions: `auth_` prefix, `_total` suffix for
//! counters. Labels are bounded — `status` is success/error, and
//! `error_category` is a closed set — so cardinality stays flat.

use metrics::{counter, gauge};

/// Record access-token issuance outcome.
///
/// Metric: `auth_token_issuance_total`
pub fn record_token_issuance(status: &str) {
    counter!("auth_token_issuance_total", "status" => status.to_string()).increment(1);
}

/// Record access-token validation outcome.
///
/// Metric: `auth_token_validations_total`
/// Labels: `status`, `error_category` (signature, untrusted_key, expired,
/// malformed, none)
pub fn record_token_validation(status: &str, error_category: Option<&str>) {
    let category = error_category.unwrap_or("none");
    counter!("auth_token_validations_total", "status" => status.to_string(), "error_category" => category.to_string())
        .increment(1);
}

/// Record a signing-key rotation attempt.
///
/// Metric: `auth_key_rotation_total`
pub fn record_key_rotation(status: &str) {
    counter!("auth_key_rotation_total", "status" => status.to_string()).increment(1);
}

/// Update the count of keys currently eligible for validation.
///
/// Metric: `auth_trusted_signing_keys`
pub fn set_trusted_signing_keys(count: u64) {
    gauge!("auth_trusted_signing_keys").set(count as f64);
}

/// Record a refresh-token rotation attempt.
///
/// Metric: `auth_refresh_rotation_total`
pub fn record_refresh_rotation(status: &str) {
    counter!("auth_refresh_rotation_total", "status" => status.to_string()).increment(1);
}

/// Record explicit refresh-token revocations.
///
/// Metric: `auth_refresh_revocations_total`
/// Labels: `scope` (single, user)
pub fn record_refresh_revocation(scope: &str, count: u64) {
    counter!("auth_refresh_revocations_total", "scope" => scope.to_string()).increment(count);
}
