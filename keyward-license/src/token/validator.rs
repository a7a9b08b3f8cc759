//! Token validation.

use super::claims::{LicenseClaims, LicenseInfo, UNLIMITED_USAGES};
use super::paseto::{self, PasetoError};
use crate::clock::Clock;
use crate::config::LicensingConfig;
use crate::device::FingerprintGenerator;
use crate::error::{LicenseError, LicenseResult};
use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use std::sync::Arc;
use tracing::debug;

const SECS_PER_DAY: f64 = 86_400.0;

/// Verifies license tokens and evaluates their claims against this device.
pub struct TokenValidator {
    public_key: Option<VerifyingKey>,
    fingerprints: FingerprintGenerator,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("public_key_set", &self.public_key.is_some())
            .finish_non_exhaustive()
    }
}

impl TokenValidator {
    /// Builds a validator from configuration.
    ///
    /// A missing public key is not an error here; [`validate`](Self::validate)
    /// reports it as [`LicenseError::PublicKeyMissing`].
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidConfiguration`] if a public key is set
    /// but cannot be decoded.
    pub fn new(
        config: &LicensingConfig,
        fingerprints: FingerprintGenerator,
        clock: Arc<dyn Clock>,
    ) -> LicenseResult<Self> {
        let public_key = config
            .public_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(paseto::parse_public_key)
            .transpose()
            .map_err(|e| LicenseError::InvalidConfiguration(format!("invalid public key format: {e}")))?;

        Ok(Self {
            public_key,
            fingerprints,
            clock,
        })
    }

    /// Fully validates a token and returns its claims.
    ///
    /// Checks run in order and stop at the first failure: key present,
    /// signature, claims decode, device binding, expiry, usage limit.
    ///
    /// # Errors
    ///
    /// - [`LicenseError::PublicKeyMissing`] if no key is configured.
    /// - [`LicenseError::InvalidToken`] for parse or signature failures.
    /// - [`LicenseError::FingerprintMismatch`], [`LicenseError::Expired`],
    ///   [`LicenseError::UsageExceeded`] for rejected claims.
    pub fn validate(&self, token: &str) -> LicenseResult<LicenseClaims> {
        let key = self.public_key.as_ref().ok_or(LicenseError::PublicKeyMissing)?;

        let verified = paseto::verify(key, token).map_err(token_error)?;
        let claims = LicenseClaims::from_json(&verified.message)
            .map_err(|e| classify(format!("invalid claims: {e}")))?;

        self.check_fingerprint(&claims)?;
        self.check_expiry(&claims)?;
        check_usage(&claims)?;

        Ok(claims)
    }

    /// Returns true if [`validate`](Self::validate) would succeed.
    #[must_use]
    pub fn is_valid(&self, token: &str) -> bool {
        match self.validate(token) {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "token rejected");
                false
            }
        }
    }

    /// Expiry of a valid token. `None` for perpetual or invalid tokens.
    #[must_use]
    pub fn expiration(&self, token: &str) -> Option<DateTime<Utc>> {
        self.validate(token).ok().and_then(|claims| claims.exp)
    }

    /// Returns true if the token is valid and expires within `days` days.
    ///
    /// Already-expired and perpetual tokens are never "expiring soon".
    #[must_use]
    pub fn is_expiring_soon(&self, token: &str, days: u32) -> bool {
        let Some(exp) = self.expiration(token) else {
            return false;
        };
        let days_left = (exp - self.clock.now()).num_seconds() as f64 / SECS_PER_DAY;
        days_left > 0.0 && days_left <= f64::from(days)
    }

    /// Projects a valid token's claims; `None` if the token does not validate.
    #[must_use]
    pub fn extract_license_info(&self, token: &str) -> Option<LicenseInfo> {
        self.validate(token).ok().map(LicenseInfo::from)
    }

    fn check_fingerprint(&self, claims: &LicenseClaims) -> LicenseResult<()> {
        let claimed = claims
            .fingerprint
            .as_deref()
            .ok_or(LicenseError::FingerprintMismatch)?;

        if self.fingerprints.generate().matches(claimed) {
            Ok(())
        } else {
            Err(LicenseError::FingerprintMismatch)
        }
    }

    fn check_expiry(&self, claims: &LicenseClaims) -> LicenseResult<()> {
        match claims.exp {
            Some(exp) if exp <= self.clock.now() => Err(LicenseError::Expired),
            _ => Ok(()),
        }
    }
}

fn check_usage(claims: &LicenseClaims) -> LicenseResult<()> {
    match (claims.max_usages, claims.current_usages) {
        (Some(UNLIMITED_USAGES), _) | (None, _) | (_, None) => Ok(()),
        (Some(max), Some(current)) if current < max => Ok(()),
        _ => Err(LicenseError::UsageExceeded),
    }
}

fn token_error(err: PasetoError) -> LicenseError {
    classify(err.to_string())
}

/// Expiry failures reported as text by lower layers become `Expired`;
/// everything else is an invalid token.
fn classify(message: String) -> LicenseError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("expired") || lower.contains("expiration") {
        LicenseError::Expired
    } else {
        LicenseError::InvalidToken(message)
    }
}
