//! License token claims.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// `max_usages` value meaning "no limit".
pub const UNLIMITED_USAGES: i64 = -1;

/// Claims carried by a license token.
///
/// Every field is optional on the wire; unknown fields are ignored. Checks
/// that depend on a field treat its absence as "no constraint" except for
/// `fingerprint`, which is mandatory at validation time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LicenseClaims {
    /// License key the token was issued for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_key: Option<String>,
    /// Fingerprint of the device the token is bound to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Expiry; `None` means perpetual.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<DateTime<Utc>>,
    /// Issuance time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<DateTime<Utc>>,
    /// Usage ceiling; [`UNLIMITED_USAGES`] disables the check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_usages: Option<i64>,
    /// Usages consumed so far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_usages: Option<i64>,
    /// Licensee name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    /// Licensee email.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    /// Feature flags, in issuer order.
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub features: Vec<String>,
    /// Free-form issuer metadata.
    #[serde(skip_serializing_if = "Map::is_empty", deserialize_with = "null_as_default")]
    pub metadata: Map<String, Value>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl LicenseClaims {
    /// Decodes claims from the signed message.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the message is not a claims object.
    pub fn from_json(message: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(message)
    }

    /// Returns true if the token never expires.
    #[must_use]
    pub fn is_perpetual(&self) -> bool {
        self.exp.is_none()
    }

    /// Returns true if the usage ceiling is disabled or absent.
    #[must_use]
    pub fn is_unmetered(&self) -> bool {
        match (self.max_usages, self.current_usages) {
            (Some(max), Some(_)) => max == UNLIMITED_USAGES,
            _ => true,
        }
    }

    /// Returns true if `feature` is granted.
    #[must_use]
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}

/// Caller-facing projection of a validated token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseInfo {
    /// License key.
    pub license_key: Option<String>,
    /// Licensee email.
    pub customer_email: Option<String>,
    /// Licensee name.
    pub customer_name: Option<String>,
    /// Expiry; `None` means perpetual.
    pub expires_at: Option<DateTime<Utc>>,
    /// Issuance time.
    pub issued_at: Option<DateTime<Utc>>,
    /// Usage ceiling.
    pub max_usages: Option<i64>,
    /// Usages consumed.
    pub current_usages: Option<i64>,
    /// Feature flags.
    pub features: Vec<String>,
    /// Issuer metadata.
    pub metadata: Map<String, Value>,
}

impl From<LicenseClaims> for LicenseInfo {
    fn from(claims: LicenseClaims) -> Self {
        Self {
            license_key: claims.license_key,
            customer_email: claims.customer_email,
            customer_name: claims.customer_name,
            expires_at: claims.exp,
            issued_at: claims.iat,
            max_usages: claims.max_usages,
            current_usages: claims.current_usages,
            features: claims.features,
            metadata: claims.metadata,
        }
    }
}
