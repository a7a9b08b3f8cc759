//! ChaCha20-Poly1305 envelopes.
//!
//! Envelope text form: `kw1.` followed by standard base64 of
//! `nonce (12) || ciphertext || tag (16)`.

use crate::error::{CryptoError, CryptoResult};
use crate::key::SealingKey;
use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

/// Size of nonce in bytes (96 bits for ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Size of authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Version marker at the start of every envelope.
pub const ENVELOPE_PREFIX: &str = "kw1.";

/// Seals `plaintext`, binding it to `context` as associated data.
///
/// # Errors
///
/// Returns [`CryptoError::Seal`] if the AEAD rejects the input.
pub fn seal(key: &SealingKey, plaintext: &[u8], context: &[u8]) -> CryptoResult<String> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad: context,
            },
        )
        .map_err(|e| CryptoError::Seal(e.to_string()))?;

    let mut raw = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    raw.extend_from_slice(&nonce_bytes);
    raw.extend_from_slice(&ciphertext);

    Ok(format!("{ENVELOPE_PREFIX}{}", STANDARD.encode(raw)))
}

/// Opens an envelope produced by [`seal`] under the same key and context.
///
/// # Errors
///
/// - [`CryptoError::MalformedEnvelope`] if the text is not a `kw1` envelope.
/// - [`CryptoError::Open`] if authentication fails.
pub fn open(key: &SealingKey, envelope: &str, context: &[u8]) -> CryptoResult<Vec<u8>> {
    let body = envelope
        .trim()
        .strip_prefix(ENVELOPE_PREFIX)
        .ok_or_else(|| CryptoError::MalformedEnvelope("unknown envelope version".to_string()))?;

    let raw = STANDARD
        .decode(body)
        .map_err(|e| CryptoError::MalformedEnvelope(format!("invalid base64: {e}")))?;

    if raw.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::MalformedEnvelope("envelope too short".to_string()));
    }

    let (nonce, ciphertext) = raw.split_at(NONCE_SIZE);
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: context,
            },
        )
        .map_err(|_| CryptoError::Open("authentication failed (wrong key or tampered data)".to_string()))
}
