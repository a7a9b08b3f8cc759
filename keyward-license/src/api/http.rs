//! reqwest-backed licensing API client.

use super::{
    DeactivationResponse, HeartbeatData, HeartbeatResponse, LicensingApi, TokenResponse,
    ValidationResponse,
};
use crate::config::LicensingConfig;
use crate::device::DeviceMetadata;
use crate::error::{LicenseError, LicenseResult};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use url::Url;

/// Which call failed; decides how statuses and transport errors map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Activate,
    Deactivate,
    Refresh,
    Heartbeat,
    Validate,
    Info,
}

impl Endpoint {
    fn path(self) -> &'static str {
        match self {
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::Refresh => "refresh",
            Self::Heartbeat => "heartbeat",
            Self::Validate => "validate",
            Self::Info => "licenses",
        }
    }

    fn status_error(self, status: StatusCode) -> LicenseError {
        match (self, status.as_u16()) {
            (Self::Deactivate, _) => {
                LicenseError::DeactivationFailed(format!("server responded {status}"))
            }
            (_, 404) => LicenseError::InvalidLicenseKey,
            (Self::Activate, 409) => LicenseError::UsageExceeded,
            (Self::Refresh | Self::Validate, 403) => LicenseError::FingerprintMismatch,
            (Self::Validate, 410) => LicenseError::Expired,
            _ => self.failure(format!("server responded {status}")),
        }
    }

    fn failure(self, reason: String) -> LicenseError {
        match self {
            Self::Activate => LicenseError::ActivationFailed(reason),
            Self::Deactivate => LicenseError::DeactivationFailed(reason),
            _ => LicenseError::ServerUnreachable(reason),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

/// Talks to `{server_url}/api/licensing/{api_version}/…` over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpLicensingApi {
    client: Client,
    base: Url,
    api_version: String,
}

impl HttpLicensingApi {
    /// Creates a client with the configured base URL and timeout.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidConfiguration`] if the URL does not
    /// parse or the HTTP client cannot be built.
    pub fn new(config: &LicensingConfig) -> LicenseResult<Self> {
        let base = Url::parse(&config.server_url).map_err(|e| {
            LicenseError::InvalidConfiguration(format!("server_url {:?}: {e}", config.server_url))
        })?;
        if base.cannot_be_a_base() {
            return Err(LicenseError::InvalidConfiguration(format!(
                "server_url {:?} cannot be used as a base URL",
                config.server_url
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .user_agent(concat!("keyward/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LicenseError::InvalidConfiguration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base,
            api_version: config.api_version.trim_matches('/').to_string(),
        })
    }

    /// Full URL for `segments` under the API root.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(["api", "licensing", self.api_version.as_str()])
                .extend(segments);
        }
        url
    }

    async fn post<B, R>(&self, endpoint: Endpoint, body: &B) -> LicenseResult<R>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = self.url(&[endpoint.path()]);
        debug!(%url, "POST");
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(endpoint, &e))?;
        decode(endpoint, response).await
    }

    async fn get<R>(&self, endpoint: Endpoint, segments: &[&str]) -> LicenseResult<R>
    where
        R: DeserializeOwned,
    {
        let url = self.url(segments);
        debug!(%url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(endpoint, &e))?;
        decode(endpoint, response).await
    }
}

fn transport_error(endpoint: Endpoint, err: &reqwest::Error) -> LicenseError {
    let reason = if err.is_timeout() {
        format!("request timed out: {err}")
    } else {
        format!("licensing server unreachable: {err}")
    };
    warn!(endpoint = endpoint.path(), %reason, "licensing request failed");
    endpoint.failure(reason)
}

async fn decode<R: DeserializeOwned>(
    endpoint: Endpoint,
    response: reqwest::Response,
) -> LicenseResult<R> {
    let status = response.status();
    if !status.is_success() {
        warn!(endpoint = endpoint.path(), %status, "licensing server rejected request");
        return Err(endpoint.status_error(status));
    }
    response
        .json::<R>()
        .await
        .map_err(|e| endpoint.failure(format!("malformed response: {e}")))
}

#[async_trait]
impl LicensingApi for HttpLicensingApi {
    async fn activate(
        &self,
        license_key: &str,
        fingerprint: &str,
        metadata: &DeviceMetadata,
    ) -> LicenseResult<TokenResponse> {
        let body = json!({
            "license_key": license_key,
            "fingerprint": fingerprint,
            "metadata": metadata,
        });
        self.post(Endpoint::Activate, &body).await
    }

    async fn deactivate(
        &self,
        license_key: &str,
        fingerprint: &str,
    ) -> LicenseResult<DeactivationResponse> {
        let body = json!({ "license_key": license_key, "fingerprint": fingerprint });
        self.post(Endpoint::Deactivate, &body).await
    }

    async fn refresh(&self, license_key: &str, fingerprint: &str) -> LicenseResult<TokenResponse> {
        let body = json!({ "license_key": license_key, "fingerprint": fingerprint });
        self.post(Endpoint::Refresh, &body).await
    }

    async fn heartbeat(
        &self,
        license_key: &str,
        fingerprint: &str,
        data: &HeartbeatData,
    ) -> HeartbeatResponse {
        let body = json!({
            "license_key": license_key,
            "fingerprint": fingerprint,
            "data": data,
        });
        self.post(Endpoint::Heartbeat, &body)
            .await
            .unwrap_or_else(|e| HeartbeatResponse::failed(e.to_string()))
    }

    async fn validate(
        &self,
        license_key: &str,
        fingerprint: &str,
    ) -> LicenseResult<ValidationResponse> {
        let body = json!({ "license_key": license_key, "fingerprint": fingerprint });
        self.post(Endpoint::Validate, &body).await
    }

    async fn license_info(&self, license_key: &str) -> LicenseResult<Map<String, Value>> {
        self.get(Endpoint::Info, &[Endpoint::Info.path(), license_key])
            .await
    }

    async fn health(&self) -> bool {
        match self.get::<HealthResponse>(Endpoint::Info, &["health"]).await {
            Ok(health) => health.status == "healthy",
            Err(e) => {
                warn!(error = %e, "health check failed");
                false
            }
        }
    }
}
