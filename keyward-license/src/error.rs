//! Error types for the licensing module.

use thiserror::Error;

/// Licensing-specific errors.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// The server does not know this license key.
    #[error("the provided license key is invalid")]
    InvalidLicenseKey,

    /// License has expired.
    #[error("the license has expired")]
    Expired,

    /// No token is stored for the requested key.
    #[error("the license has not been activated")]
    NotActivated,

    /// The licensing server could not be reached or answered unexpectedly.
    #[error("unable to reach the licensing server: {0}")]
    ServerUnreachable(String),

    /// Token failed to parse, failed signature verification, or the stored
    /// copy is corrupted.
    #[error("the license token is invalid or corrupted: {0}")]
    InvalidToken(String),

    /// Token is bound to a different device.
    #[error("device fingerprint does not match the licensed device")]
    FingerprintMismatch,

    /// `current_usages` has reached `max_usages`.
    #[error("license usage limit has been exceeded")]
    UsageExceeded,

    /// Missing or malformed configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Activation failed.
    #[error("license activation failed: {0}")]
    ActivationFailed(String),

    /// Deactivation failed.
    #[error("license deactivation failed: {0}")]
    DeactivationFailed(String),

    /// Durable storage could not be written.
    #[error("failed to store license token: {0}")]
    TokenStorageFailed(String),

    /// No verification key configured.
    #[error("public key for token verification is not configured")]
    PublicKeyMissing,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LicenseError {
    /// Returns true for failures that mean the license itself was rejected,
    /// as opposed to the server or local environment misbehaving.
    #[must_use]
    pub fn is_license_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidLicenseKey
                | Self::Expired
                | Self::FingerprintMismatch
                | Self::UsageExceeded
                | Self::InvalidToken(_)
        )
    }
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;
