//! Remote licensing API.
//!
//! [`LicensingApi`] is the seam between the orchestrator and the network.
//! [`HttpLicensingApi`] talks to a real server; tests plug in fakes.

#[cfg(feature = "online")]
mod http;

#[cfg(feature = "online")]
pub use http::HttpLicensingApi;

use crate::device::DeviceMetadata;
use crate::error::LicenseResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Response carrying a (possibly new) license token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Signed license token.
    #[serde(default)]
    pub token: Option<String>,
    /// Any other fields the server sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response to a deactivation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeactivationResponse {
    /// Whether the server released the seat.
    #[serde(default)]
    pub success: bool,
    /// Any other fields the server sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response to a heartbeat. Transport failures are folded into
/// `success: false` with `error` set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    /// Whether the server accepted the heartbeat.
    #[serde(default)]
    pub success: bool,
    /// Replacement token, if the server rotated it.
    #[serde(default)]
    pub token: Option<String>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HeartbeatResponse {
    /// A failed heartbeat with a reason.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            token: None,
            error: Some(error.into()),
        }
    }
}

/// Runtime details reported with each heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatData {
    /// Host application version.
    pub version: String,
    /// Deployment environment.
    pub environment: String,
}

/// Response to an online validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResponse {
    /// Whether the server considers the license valid.
    #[serde(default)]
    pub valid: bool,
    /// Any other fields the server sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The licensing server's endpoints.
///
/// Status-code mapping is the implementation's job: 404 is
/// `InvalidLicenseKey`, 409 `UsageExceeded`, 403 `FingerprintMismatch`,
/// 410 `Expired`, anything else an endpoint-specific failure.
#[async_trait]
pub trait LicensingApi: Send + Sync {
    /// Binds `license_key` to this device and returns its first token.
    async fn activate(
        &self,
        license_key: &str,
        fingerprint: &str,
        metadata: &DeviceMetadata,
    ) -> LicenseResult<TokenResponse>;

    /// Releases this device's seat.
    async fn deactivate(
        &self,
        license_key: &str,
        fingerprint: &str,
    ) -> LicenseResult<DeactivationResponse>;

    /// Exchanges the binding for a fresh token.
    async fn refresh(&self, license_key: &str, fingerprint: &str) -> LicenseResult<TokenResponse>;

    /// Reports liveness. Never fails; errors are returned in the response.
    async fn heartbeat(
        &self,
        license_key: &str,
        fingerprint: &str,
        data: &HeartbeatData,
    ) -> HeartbeatResponse;

    /// Asks the server whether the license is valid for this device.
    async fn validate(
        &self,
        license_key: &str,
        fingerprint: &str,
    ) -> LicenseResult<ValidationResponse>;

    /// Fetches the server's view of a license.
    async fn license_info(&self, license_key: &str) -> LicenseResult<Map<String, Value>>;

    /// Returns true if the server reports itself healthy.
    async fn health(&self) -> bool;
}
