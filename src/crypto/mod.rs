//! Cryptographic operations: RSA keypair generation, JWT signing and
//! verification (RS256), AES-256-GCM wrapping of private key material at
//! rest, and CSPRNG secrets.
//!
//! Every signing/verification call derives a fresh context from stored PEM
//! material; no long-lived mutable crypto objects are held anywhere.

use crate::errors::AuthError;
use crate::models::WrappedPrivateKey;
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use ring::{
    aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM},
    rand::{SecureRandom, SystemRandom},
};
use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::pkcs8::LineEnding;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Maximum allowed JWT size in bytes (4KB).
///
/// Oversized tokens are rejected before base64 decoding or any
/// cryptographic work, bounding the cost an attacker can impose with a
/// single request.
const MAX_JWT_SIZE_BYTES: usize = 4096;

/// Refresh secrets carry 512 bits of entropy.
const REFRESH_SECRET_BYTES: usize = 64;

/// JWT claims for an access token.
///
/// `sub` and `name` identify a person; the custom Debug implementation
/// redacts them so claims can appear in trace output safely.
#[derive(Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub jti: String,
    pub roles: Vec<String>,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("sub", &"[REDACTED]")
            .field("name", &"[REDACTED]")
            .field("jti", &self.jti)
            .field("roles", &self.roles)
            .field("iss", &self.iss)
            .field("aud", &self.aud)
            .field("iat", &self.iat)
            .field("nbf", &self.nbf)
            .field("exp", &self.exp)
            .finish()
    }
}

/// Issuer/audience expectations applied during verification.
#[derive(Debug, Clone)]
pub struct TokenExpectations {
    pub issuer: String,
    pub audience: String,
}

/// Generate an RSA keypair of the given modulus size.
///
/// Returns `(public_key_pem, private_key_pem)` in PKCS#1 PEM form; the
/// private half is wrapped in a `SecretString` so it cannot leak through
/// Debug output.
pub fn generate_rsa_keypair(key_size: u32) -> Result<(String, SecretString), AuthError> {
    let mut rng = OsRng;

    let private_key = RsaPrivateKey::new(&mut rng, key_size as usize)
        .map_err(|e| AuthError::Crypto(format!("RSA keypair generation failed: {}", e)))?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_pem = private_key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| AuthError::Crypto(format!("Private key encoding failed: {}", e)))?;
    let public_pem = public_key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| AuthError::Crypto(format!("Public key encoding failed: {}", e)))?;

    Ok((public_pem, SecretString::from(private_pem.to_string())))
}

/// Wrap a private key PEM with AES-256-GCM under the 32-byte master key.
///
/// The 16-byte authentication tag stays appended to the ciphertext; a
/// random 96-bit nonce is generated per wrap.
pub fn wrap_private_key(
    private_key_pem: &SecretString,
    master_key: &[u8],
) -> Result<WrappedPrivateKey, AuthError> {
    let sealing_key = gcm_key(master_key)?;

    let rng = SystemRandom::new();
    let mut nonce_bytes = [0u8; 12];
    rng.fill(&mut nonce_bytes)
        .map_err(|e| AuthError::Crypto(format!("Nonce generation failed: {}", e)))?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = private_key_pem.expose_secret().as_bytes().to_vec();
    sealing_key
        .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|e| AuthError::Crypto(format!("Key wrapping failed: {}", e)))?;

    Ok(WrappedPrivateKey {
        nonce: STANDARD.encode(nonce_bytes),
        ciphertext: STANDARD.encode(in_out),
    })
}

/// Unwrap a private key PEM previously wrapped with [`wrap_private_key`].
pub fn unwrap_private_key(
    wrapped: &WrappedPrivateKey,
    master_key: &[u8],
) -> Result<SecretString, AuthError> {
    let opening_key = gcm_key(master_key)?;

    let nonce_bytes: [u8; 12] = STANDARD
        .decode(&wrapped.nonce)
        .map_err(|e| AuthError::Crypto(format!("Invalid nonce encoding: {}", e)))?
        .as_slice()
        .try_into()
        .map_err(|_| AuthError::Crypto("Invalid nonce length".to_string()))?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = STANDARD
        .decode(&wrapped.ciphertext)
        .map_err(|e| AuthError::Crypto(format!("Invalid ciphertext encoding: {}", e)))?;

    let plaintext = opening_key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| AuthError::Crypto("Key unwrapping failed: bad master key or corrupt material".to_string()))?;

    let pem = String::from_utf8(plaintext.to_vec())
        .map_err(|_| AuthError::Crypto("Unwrapped key is not valid UTF-8".to_string()))?;

    Ok(SecretString::from(pem))
}

fn gcm_key(master_key: &[u8]) -> Result<LessSafeKey, AuthError> {
    if master_key.len() != 32 {
        return Err(AuthError::Crypto(format!(
            "Invalid master key length: {} (expected 32)",
            master_key.len()
        )));
    }
    let unbound = UnboundKey::new(&AES_256_GCM, master_key)
        .map_err(|e| AuthError::Crypto(format!("Cipher key creation failed: {}", e)))?;
    Ok(LessSafeKey::new(unbound))
}

/// Fill a buffer of `len` bytes from the system CSPRNG.
pub fn generate_random_bytes(len: usize) -> Result<Vec<u8>, AuthError> {
    let rng = SystemRandom::new();
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes)
        .map_err(|e| AuthError::Crypto(format!("Random generation failed: {}", e)))?;
    Ok(bytes)
}

/// Generate an opaque refresh-token secret: 512 bits of CSPRNG output,
/// standard base64. Carries no claims; possession is the capability.
pub fn generate_refresh_secret() -> Result<String, AuthError> {
    Ok(STANDARD.encode(generate_random_bytes(REFRESH_SECRET_BYTES)?))
}

/// Sign claims as an RS256 JWT, tagging the header with `kid` so
/// validators can find the matching public key without trial-and-error.
pub fn sign_jwt(
    claims: &Claims,
    private_key_pem: &SecretString,
    key_id: &str,
) -> Result<String, AuthError> {
    let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.expose_secret().as_bytes())
        .map_err(|e| AuthError::Crypto(format!("Invalid private key material: {}", e)))?;

    let mut header = Header::new(Algorithm::RS256);
    header.typ = Some("JWT".to_string());
    header.kid = Some(key_id.to_string());

    encode(&header, claims, &encoding_key)
        .map_err(|e| AuthError::Crypto(format!("JWT signing failed: {}", e)))
}

/// Parse a JWT header without verifying the signature.
///
/// Used to look up the signing key by `kid` and to reject algorithm
/// substitution before any key material is touched. The token MUST still
/// be verified afterwards.
pub fn parse_unverified_header(token: &str) -> Result<Header, AuthError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        return Err(AuthError::MalformedToken(format!(
            "token exceeds {} bytes",
            MAX_JWT_SIZE_BYTES
        )));
    }

    jsonwebtoken::decode_header(token)
        .map_err(|e| AuthError::MalformedToken(format!("unparseable header: {}", e)))
}

/// Verify an RS256 JWT against one public key.
///
/// Issuer and audience are always enforced. Lifetime checks (`exp`/`nbf`)
/// are skipped when `validate_lifetime` is false; that mode exists solely
/// for the refresh flow, which needs the claims of an already-expired
/// access token.
pub fn verify_jwt(
    token: &str,
    public_key_pem: &str,
    expectations: &TokenExpectations,
    validate_lifetime: bool,
) -> Result<Claims, AuthError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        return Err(AuthError::MalformedToken(format!(
            "token exceeds {} bytes",
            MAX_JWT_SIZE_BYTES
        )));
    }

    let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
        .map_err(|e| AuthError::Crypto(format!("Invalid public key material: {}", e)))?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_issuer(&[&expectations.issuer]);
    validation.set_audience(&[&expectations.audience]);
    validation.validate_exp = validate_lifetime;
    validation.validate_nbf = validate_lifetime;

    let token_data = decode::<Claims>(token, &decoding_key, &validation).map_err(|e| {
        use jsonwebtoken::errors::ErrorKind;
        match e.kind() {
            ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => AuthError::ExpiredToken,
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                AuthError::InvalidSignature
            }
            _ => AuthError::MalformedToken(format!("token rejected: {}", e)),
        }
    })?;

    Ok(token_data.claims)
}

/// RFC 7517 RSA parameters (`n`, `e`) for a PKCS#1 public key PEM, both
/// base64url without padding.
pub fn rsa_jwk_components(public_key_pem: &str) -> Result<(String, String), AuthError> {
    let public_key = RsaPublicKey::from_pkcs1_pem(public_key_pem)
        .map_err(|e| AuthError::Crypto(format!("Invalid public key material: {}", e)))?;

    let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
    let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());
    Ok((n, e))
}

/// Short SHA-256 fingerprint of a bearer secret, for log lines and
/// forensic correlation. Never log the secret itself.
pub fn token_fingerprint(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    let mut hexed = hex::encode(digest);
    hexed.truncate(16);
    hexed
}
