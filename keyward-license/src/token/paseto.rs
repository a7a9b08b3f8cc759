//! PASETO `v4.public` signing and verification.
//!
//! Token layout: `v4.public.` + base64url(message || signature) with an
//! optional `.` + base64url(footer). The Ed25519 signature covers
//! `PAE(header, message, footer, implicit)`; no implicit assertion is used.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SIGNATURE_LENGTH};
use thiserror::Error;

/// Header shared by every v4.public token.
pub const HEADER: &str = "v4.public.";

/// Implicit assertion; none is used.
const IMPLICIT: &[u8] = b"";

/// PASERK prefix for v4 public keys.
pub const PASERK_PUBLIC_PREFIX: &str = "k4.public.";

/// Why a token failed to parse or verify.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PasetoError {
    /// Not a `v4.public` token.
    #[error("unsupported token header")]
    UnsupportedHeader,

    /// Wrong number of `.`-separated segments.
    #[error("malformed token: {0}")]
    Malformed(&'static str),

    /// A segment was not valid base64url.
    #[error("invalid base64url in {0}")]
    Encoding(&'static str),

    /// Ed25519 signature did not verify.
    #[error("signature verification failed")]
    BadSignature,

    /// The verification key could not be decoded.
    #[error("invalid public key: {0}")]
    InvalidKey(String),
}

/// A verified token's message and footer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    /// Signed message (the claims JSON).
    pub message: Vec<u8>,
    /// Footer bytes (unsigned metadata, authenticated by the signature).
    pub footer: Vec<u8>,
}

/// Pre-authentication encoding.
pub fn pae(pieces: &[&[u8]]) -> Vec<u8> {
    let capacity = 8 + pieces.iter().map(|p| 8 + p.len()).sum::<usize>();
    let mut out = Vec::with_capacity(capacity);
    out.extend_from_slice(&le64(pieces.len() as u64));
    for piece in pieces {
        out.extend_from_slice(&le64(piece.len() as u64));
        out.extend_from_slice(piece);
    }
    out
}

fn le64(n: u64) -> [u8; 8] {
    // Top bit is cleared for interoperability with languages lacking u64.
    (n & (u64::MAX >> 1)).to_le_bytes()
}

/// Signs `message` and returns a `v4.public` token.
#[must_use]
pub fn sign(key: &SigningKey, message: &[u8], footer: &[u8]) -> String {
    let m2 = pae(&[HEADER.as_bytes(), message, footer, IMPLICIT]);
    let signature = key.sign(&m2);

    let mut body = Vec::with_capacity(message.len() + SIGNATURE_LENGTH);
    body.extend_from_slice(message);
    body.extend_from_slice(&signature.to_bytes());

    let mut token = format!("{HEADER}{}", URL_SAFE_NO_PAD.encode(body));
    if !footer.is_empty() {
        token.push('.');
        token.push_str(&URL_SAFE_NO_PAD.encode(footer));
    }
    token
}

/// Verifies a `v4.public` token against `key`.
///
/// # Errors
///
/// Returns a [`PasetoError`] describing the first structural or
/// cryptographic failure.
pub fn verify(key: &VerifyingKey, token: &str) -> Result<VerifiedToken, PasetoError> {
    let rest = token
        .trim()
        .strip_prefix(HEADER)
        .ok_or(PasetoError::UnsupportedHeader)?;

    let mut segments = rest.split('.');
    let body_b64 = segments.next().unwrap_or_default();
    let footer_b64 = segments.next();
    if segments.next().is_some() {
        return Err(PasetoError::Malformed("too many segments"));
    }

    let body = URL_SAFE_NO_PAD
        .decode(body_b64)
        .map_err(|_| PasetoError::Encoding("payload"))?;
    let footer = match footer_b64 {
        Some(f) => URL_SAFE_NO_PAD
            .decode(f)
            .map_err(|_| PasetoError::Encoding("footer"))?,
        None => Vec::new(),
    };

    if body.len() < SIGNATURE_LENGTH {
        return Err(PasetoError::Malformed("payload shorter than a signature"));
    }
    let (message, sig_bytes) = body.split_at(body.len() - SIGNATURE_LENGTH);
    let signature =
        Signature::from_slice(sig_bytes).map_err(|_| PasetoError::Malformed("signature length"))?;

    let m2 = pae(&[HEADER.as_bytes(), message, &footer, IMPLICIT]);
    key.verify(&m2, &signature)
        .map_err(|_| PasetoError::BadSignature)?;

    Ok(VerifiedToken {
        message: message.to_vec(),
        footer,
    })
}

/// Parses a verification key.
///
/// Accepts PASERK `k4.public.<base64url>`, plain base64 / base64url, or hex,
/// each encoding exactly 32 bytes.
///
/// # Errors
///
/// Returns [`PasetoError::InvalidKey`] if no form decodes to a valid key.
pub fn parse_public_key(encoded: &str) -> Result<VerifyingKey, PasetoError> {
    let encoded = encoded.trim();

    let bytes = if let Some(paserk) = encoded.strip_prefix(PASERK_PUBLIC_PREFIX) {
        URL_SAFE_NO_PAD
            .decode(paserk)
            .map_err(|e| PasetoError::InvalidKey(format!("PASERK body: {e}")))?
    } else if encoded.len() == 64 && encoded.chars().all(|c| c.is_ascii_hexdigit()) {
        hex::decode(encoded).map_err(|e| PasetoError::InvalidKey(e.to_string()))?
    } else {
        decode_any_base64(encoded)
            .ok_or_else(|| PasetoError::InvalidKey("not base64, hex or PASERK".to_string()))?
    };

    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| PasetoError::InvalidKey(format!("expected 32 bytes, got {}", b.len())))?;

    VerifyingKey::from_bytes(&bytes).map_err(|e| PasetoError::InvalidKey(e.to_string()))
}

/// Encodes a verification key as PASERK.
#[must_use]
pub fn to_paserk(key: &VerifyingKey) -> String {
    format!("{PASERK_PUBLIC_PREFIX}{}", URL_SAFE_NO_PAD.encode(key.to_bytes()))
}

fn decode_any_base64(s: &str) -> Option<Vec<u8>> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};
    [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD]
        .into_iter()
        .find_map(|engine| engine.decode(s).ok())
}
