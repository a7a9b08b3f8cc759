//! Error types for the sealing layer.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Sealing failed.
    #[error("seal failed: {0}")]
    Seal(String),

    /// Opening failed (wrong key, wrong context, or tampered data).
    #[error("open failed: {0}")]
    Open(String),

    /// Sealed envelope is not in a recognised format.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}
