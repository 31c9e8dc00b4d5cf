//! Cryptographic operations for webhook secrets and payload signing.
//!
//! - Time-bound HMAC-SHA256 signatures over outgoing payloads
//! - AES-256-GCM encryption/decryption for subscription secrets at rest

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::WebhookError;

/// Nonce size for AES-GCM (96 bits / 12 bytes).
const NONCE_SIZE: usize = 12;

/// Required key length for AES-256-GCM.
const KEY_SIZE: usize = 32;

/// Default replay-protection window for signature verification, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Payload signing
// ---------------------------------------------------------------------------

/// Sign a payload with the subscriber's secret.
///
/// Returns the signature header value `t=<unix-seconds>,v1=<hex>`, where the
/// HMAC-SHA256 covers `"<t>.<payload>"`. Binding the timestamp into the
/// signed message lets receivers reject replayed deliveries.
#[must_use]
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let timestamp = Utc::now().timestamp().to_string();
    let signature = hmac_hex(secret, &timestamp, payload);
    format!("t={timestamp},v1={signature}")
}

/// Verify a signature header against a payload.
///
/// Parses `t` and `v1` from the header, rejects timestamps outside
/// `tolerance_secs` of now, recomputes the HMAC, and compares in constant
/// time. Malformed headers fail closed.
#[must_use]
pub fn verify_signature(secret: &str, payload: &[u8], header: &str, tolerance_secs: i64) -> bool {
    let Some((timestamp, provided_hex)) = parse_signature_header(header) else {
        return false;
    };

    let Ok(signed_at) = timestamp.parse::<i64>() else {
        return false;
    };
    if (Utc::now().timestamp() - signed_at).abs() > tolerance_secs {
        return false;
    }

    let computed = hmac_hex(secret, timestamp, payload);
    constant_time_eq(provided_hex.as_bytes(), computed.as_bytes())
}

/// Compute the hex-encoded HMAC-SHA256 of `"<timestamp>.<payload>"`.
fn hmac_hex(secret: &str, timestamp: &str, payload: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");

    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);

    hex::encode(mac.finalize().into_bytes())
}

/// Split a `t=<ts>,v1=<hex>` header into its parts.
fn parse_signature_header(header: &str) -> Option<(&str, &str)> {
    let mut timestamp = None;
    let mut signature = None;

    for part in header.split(',') {
        match part.split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signature = Some(value),
            _ => {}
        }
    }

    timestamp.zip(signature)
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

// ---------------------------------------------------------------------------
// AES-256-GCM encryption/decryption (for secrets at rest)
// ---------------------------------------------------------------------------

/// Encrypt a plaintext secret to a base64-encoded string for storage.
///
/// Format: base64(nonce || ciphertext || auth_tag)
pub fn encrypt_secret(plaintext: &str, key: &[u8]) -> Result<String, WebhookError> {
    let cipher = build_cipher(key)?;

    // Nonce comes straight from the operating system's CSPRNG.
    use rand::rngs::OsRng;
    use rand::RngCore;
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(&result))
}

/// Decrypt a base64-encoded secret from storage back to plaintext.
pub fn decrypt_secret(encoded: &str, key: &[u8]) -> Result<String, WebhookError> {
    let cipher = build_cipher(key)?;

    let encrypted = BASE64
        .decode(encoded)
        .map_err(|e| WebhookError::EncryptionFailed(format!("Base64 decode failed: {e}")))?;

    if encrypted.len() < NONCE_SIZE + 1 {
        return Err(WebhookError::EncryptionFailed(
            "Invalid encrypted data format".to_string(),
        ));
    }

    let nonce = Nonce::from_slice(&encrypted[..NONCE_SIZE]);
    let ciphertext = &encrypted[NONCE_SIZE..];

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

    String::from_utf8(plaintext).map_err(|e| WebhookError::EncryptionFailed(e.to_string()))
}

fn build_cipher(key: &[u8]) -> Result<Aes256Gcm, WebhookError> {
    if key.len() != KEY_SIZE {
        return Err(WebhookError::EncryptionFailed(format!(
            "Invalid key length: expected {KEY_SIZE} bytes, got {}",
            key.len()
        )));
    }

    Aes256Gcm::new_from_slice(key).map_err(|e| WebhookError::EncryptionFailed(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
