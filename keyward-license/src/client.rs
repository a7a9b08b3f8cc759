//! License orchestration.
//!
//! [`LicenseClient`] ties fingerprinting, the remote API, the token store and
//! the validator together. Local checks never touch the network; refresh,
//! heartbeat and the grace period take over when the stored token is no
//! longer enough. [`LicenseClient::check_access`] runs the whole fallback
//! chain and is what request guards should call.

use crate::api::{HeartbeatData, LicensingApi};
use crate::clock::{Clock, SystemClock};
use crate::config::LicensingConfig;
use crate::device::{FingerprintGenerator, HostProbe};
use crate::error::{LicenseError, LicenseResult};
use crate::store::cache::{self, TokenCache};
use crate::store::{
    derive_sealing_key, GracePeriodRecord, TokenStore, GRACE_REASON_SERVER_UNREACHABLE,
};
use crate::token::{LicenseClaims, LicenseInfo, TokenValidator};
use chrono::{DateTime, Utc};
use keyward_crypto::SealingKey;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Days before expiry at which [`LicenseClient::check_access`] starts
/// reporting `expiring_at`.
pub const EXPIRY_WARNING_DAYS: u32 = 7;

/// Result of a best-effort operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The operation ran and succeeded.
    Success,
    /// Nothing needed doing (disabled, or not due yet).
    Skipped,
    /// The operation ran and failed.
    Failed(String),
}

impl Outcome {
    /// True for [`Success`](Self::Success) and [`Skipped`](Self::Skipped).
    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// Where a license key stands locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseState {
    /// Nothing stored for this key.
    NoToken,
    /// The stored token validates.
    Valid,
    /// The stored token does not validate, but an offline grace period is
    /// running.
    GracePeriod {
        /// When the grace period runs out.
        ends_at: DateTime<Utc>,
    },
    /// The stored token does not validate and no grace period applies.
    Invalid,
}

impl LicenseState {
    /// Returns true if the application may run.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Valid | Self::GracePeriod { .. })
    }
}

/// Why access was granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessReason {
    /// The stored token validated.
    Valid,
    /// The stored token failed, but a refresh produced a good one.
    Refreshed,
    /// An earlier grace period is still running.
    GracePeriod,
    /// The server is unreachable; a grace period was started just now.
    GraceStarted,
}

impl AccessReason {
    /// True when access rests on the offline grace period.
    #[must_use]
    pub fn is_grace(self) -> bool {
        matches!(self, Self::GracePeriod | Self::GraceStarted)
    }
}

/// Result of [`LicenseClient::check_access`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// Go ahead.
    Allowed {
        /// How the decision was reached.
        reason: AccessReason,
        /// Set when the license expires within [`EXPIRY_WARNING_DAYS`].
        expiring_at: Option<DateTime<Utc>>,
    },
    /// No valid license and the server says so.
    Denied,
}

impl AccessDecision {
    /// Returns true for [`Allowed`](Self::Allowed).
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Assembles a [`LicenseClient`], letting tests and embedders swap out any
/// collaborator.
pub struct LicenseClientBuilder {
    config: LicensingConfig,
    api: Option<Arc<dyn LicensingApi>>,
    clock: Option<Arc<dyn Clock>>,
    cache: Option<Arc<dyn TokenCache>>,
    sealing_key: Option<SealingKey>,
    probe: Option<Arc<dyn HostProbe>>,
}

impl LicenseClientBuilder {
    /// Uses `api` instead of the HTTP client.
    #[must_use]
    pub fn api(mut self, api: Arc<dyn LicensingApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Uses `clock` instead of wall-clock time.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Uses `cache` instead of the one described by the configuration.
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn TokenCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Uses `key` for at-rest sealing instead of deriving it from
    /// `app_secret`.
    #[must_use]
    pub fn sealing_key(mut self, key: SealingKey) -> Self {
        self.sealing_key = Some(key);
        self
    }

    /// Reads host identity from `probe` instead of the running machine.
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn HostProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Validates the configuration and wires everything together.
    ///
    /// # Errors
    ///
    /// - [`LicenseError::InvalidConfiguration`] for a bad configuration or
    ///   public key, or when no API is given and the `online` feature is off.
    /// - [`LicenseError::TokenStorageFailed`] if the storage directory cannot
    ///   be created.
    pub fn build(self) -> LicenseResult<LicenseClient> {
        let Self {
            config,
            api,
            clock,
            cache,
            sealing_key,
            probe,
        } = self;

        config.validate()?;

        let clock = clock.unwrap_or_else(|| Arc::new(SystemClock));
        let fingerprints = match probe {
            Some(probe) => FingerprintGenerator::with_probe(&config, probe),
            None => FingerprintGenerator::new(&config),
        };
        let cache = cache.unwrap_or_else(|| cache::from_config(&config.cache));
        let sealing_key = match sealing_key {
            Some(key) => key,
            None => derive_sealing_key(&config)?,
        };
        let api = match api {
            Some(api) => api,
            None => default_api(&config)?,
        };

        let store = TokenStore::new(&config, sealing_key, cache, Arc::clone(&clock))?;
        let validator = TokenValidator::new(&config, fingerprints.clone(), Arc::clone(&clock))?;

        Ok(LicenseClient {
            config,
            api,
            fingerprints,
            store,
            validator,
            clock,
        })
    }
}

#[cfg(feature = "online")]
fn default_api(config: &LicensingConfig) -> LicenseResult<Arc<dyn LicensingApi>> {
    Ok(Arc::new(crate::api::HttpLicensingApi::new(config)?))
}

#[cfg(not(feature = "online"))]
fn default_api(_config: &LicensingConfig) -> LicenseResult<Arc<dyn LicensingApi>> {
    Err(LicenseError::InvalidConfiguration(
        "no licensing API configured and the `online` feature is disabled".to_string(),
    ))
}

/// The licensing client.
///
/// Every `key` argument falls back to the configured license key when
/// `None`. `LicenseClient` is `Send + Sync`; share it behind an `Arc`.
pub struct LicenseClient {
    config: LicensingConfig,
    api: Arc<dyn LicensingApi>,
    fingerprints: FingerprintGenerator,
    store: TokenStore,
    validator: TokenValidator,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LicenseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseClient")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl LicenseClient {
    /// Starts building a client for `config`.
    #[must_use]
    pub fn builder(config: LicensingConfig) -> LicenseClientBuilder {
        LicenseClientBuilder {
            config,
            api: None,
            clock: None,
            cache: None,
            sealing_key: None,
            probe: None,
        }
    }

    /// Builds a client with the default collaborators.
    ///
    /// # Errors
    ///
    /// See [`LicenseClientBuilder::build`].
    pub fn new(config: LicensingConfig) -> LicenseResult<Self> {
        Self::builder(config).build()
    }

    /// The configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &LicensingConfig {
        &self.config
    }

    /// The underlying token store.
    #[must_use]
    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// The underlying validator.
    #[must_use]
    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    // ── Activation ───────────────────────────────────────────────

    /// Activates `key` on this device and stores the issued token.
    ///
    /// # Errors
    ///
    /// - [`LicenseError::InvalidConfiguration`] if no key is given or
    ///   configured.
    /// - [`LicenseError::InvalidLicenseKey`] or
    ///   [`LicenseError::UsageExceeded`] when the server rejects the key.
    /// - [`LicenseError::ActivationFailed`] for any other failure, including
    ///   a response without a token.
    pub async fn activate(&self, key: Option<&str>) -> LicenseResult<()> {
        let key = self.require_key(key)?;
        let fingerprint = self.fingerprints.generate();
        let metadata = self.fingerprints.metadata();

        let response = self
            .api
            .activate(key, fingerprint.as_str(), &metadata)
            .await
            .map_err(activation_error)?;

        let token = response
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                LicenseError::ActivationFailed("No token received from server".to_string())
            })?;

        self.store.store(&token, key).map_err(activation_error)?;
        self.store.store_last_heartbeat().map_err(activation_error)?;

        info!("license activated");
        Ok(())
    }

    /// Releases this device's seat and forgets the local token.
    ///
    /// The server's answer is not inspected: a seat the server already
    /// released, or refuses to release, is still cleared locally.
    pub async fn deactivate(&self, key: Option<&str>) -> Outcome {
        let Some(key) = self.resolve_key(key) else {
            return Outcome::Failed("no license key provided".to_string());
        };
        let fingerprint = self.fingerprints.generate();

        if let Err(e) = self.api.deactivate(key, fingerprint.as_str()).await {
            warn!(error = %e, "remote deactivation failed; clearing local token anyway");
        }

        match self.store.delete(key) {
            Ok(()) => {
                info!("license deactivated");
                Outcome::Success
            }
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }

    // ── Local validation ─────────────────────────────────────────

    /// Returns true if the stored token for `key` validates. Never touches
    /// the network.
    pub fn is_valid(&self, key: Option<&str>) -> bool {
        let Some(key) = self.resolve_key(key) else {
            return false;
        };
        match self.store.retrieve(key) {
            Ok(Some(token)) => self.validator.is_valid(&token),
            Ok(None) => false,
            Err(e) => {
                debug!(error = %e, "stored token unusable");
                false
            }
        }
    }

    /// Validates the stored token for `key` and returns its claims.
    ///
    /// # Errors
    ///
    /// - [`LicenseError::InvalidConfiguration`] if no key is given or
    ///   configured.
    /// - [`LicenseError::NotActivated`] if nothing is stored.
    /// - Any validator error otherwise.
    pub fn validate(&self, key: Option<&str>) -> LicenseResult<LicenseClaims> {
        let key = self.require_key(key)?;
        let token = self.store.retrieve(key)?.ok_or(LicenseError::NotActivated)?;
        self.validator.validate(&token)
    }

    /// Returns true if the stored token is valid and expires within `days`.
    pub fn is_expiring_soon(&self, days: u32, key: Option<&str>) -> bool {
        self.stored_token(key)
            .is_some_and(|token| self.validator.is_expiring_soon(&token, days))
    }

    /// Summary of the stored license; `None` if it does not validate.
    pub fn license_info(&self, key: Option<&str>) -> Option<LicenseInfo> {
        self.stored_token(key)
            .and_then(|token| self.validator.extract_license_info(&token))
    }

    /// Where `key` stands locally, grace period included.
    pub fn state(&self, key: Option<&str>) -> LicenseState {
        let token = match self.resolve_key(key).map(|k| self.store.retrieve(k)) {
            None | Some(Ok(None)) => return LicenseState::NoToken,
            Some(Ok(Some(token))) => Some(token),
            Some(Err(_)) => None,
        };

        if token.is_some_and(|t| self.validator.is_valid(&t)) {
            return LicenseState::Valid;
        }
        match self.grace_period_end() {
            Some(ends_at) if self.clock.now() < ends_at => LicenseState::GracePeriod { ends_at },
            _ => LicenseState::Invalid,
        }
    }

    // ── Server round trips ───────────────────────────────────────

    /// Exchanges the binding for a fresh token and stores it.
    pub async fn refresh(&self, key: Option<&str>) -> Outcome {
        let Some(key) = self.resolve_key(key) else {
            return Outcome::Failed("no license key provided".to_string());
        };
        let fingerprint = self.fingerprints.generate();

        let token = match self.api.refresh(key, fingerprint.as_str()).await {
            Ok(response) => response.token.filter(|t| !t.is_empty()),
            Err(e) => return Outcome::Failed(e.to_string()),
        };
        let Some(token) = token else {
            return Outcome::Failed("no token received from server".to_string());
        };

        let stored = self
            .store
            .store(&token, key)
            .and_then(|()| self.store.store_last_heartbeat());
        match stored {
            Ok(()) => {
                info!("license token refreshed");
                Outcome::Success
            }
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }

    /// Checks in with the server if heartbeats are enabled and the interval
    /// has elapsed. A token returned by the server replaces the stored one.
    ///
    /// The last-heartbeat record is shared by every key.
    pub async fn heartbeat(&self, key: Option<&str>) -> Outcome {
        if !self.config.heartbeat.enabled {
            return Outcome::Skipped;
        }
        let Some(key) = self.resolve_key(key) else {
            return Outcome::Failed("no license key provided".to_string());
        };
        if !self.heartbeat_due() {
            return Outcome::Skipped;
        }

        let fingerprint = self.fingerprints.generate();
        let data = HeartbeatData {
            version: self.config.app_version.clone(),
            environment: self.config.environment.clone(),
        };
        let response = self.api.heartbeat(key, fingerprint.as_str(), &data).await;

        if !response.success {
            let reason = response
                .error
                .unwrap_or_else(|| "heartbeat rejected by server".to_string());
            warn!(%reason, "heartbeat failed");
            return Outcome::Failed(reason);
        }

        if let Err(e) = self.store.store_last_heartbeat() {
            return Outcome::Failed(e.to_string());
        }
        if let Some(token) = response.token.filter(|t| !t.is_empty()) {
            if let Err(e) = self.store.store(&token, key) {
                return Outcome::Failed(e.to_string());
            }
            info!("heartbeat rotated license token");
        }
        Outcome::Success
    }

    /// Asks the server whether `key` is valid for this device.
    ///
    /// # Errors
    ///
    /// [`LicenseError::InvalidConfiguration`] without a key, otherwise the
    /// API's mapped error.
    pub async fn validate_online(&self, key: Option<&str>) -> LicenseResult<bool> {
        let key = self.require_key(key)?;
        let fingerprint = self.fingerprints.generate();
        let response = self.api.validate(key, fingerprint.as_str()).await?;
        Ok(response.valid)
    }

    /// Fetches the server's record for `key`.
    ///
    /// # Errors
    ///
    /// [`LicenseError::InvalidConfiguration`] without a key, otherwise the
    /// API's mapped error.
    pub async fn fetch_remote_info(&self, key: Option<&str>) -> LicenseResult<Map<String, Value>> {
        let key = self.require_key(key)?;
        self.api.license_info(key).await
    }

    /// Returns true if the licensing server reports itself healthy.
    pub async fn is_server_healthy(&self) -> bool {
        self.api.health().await
    }

    // ── Grace period ─────────────────────────────────────────────

    /// Returns true while a recorded grace period has not yet run out.
    pub fn is_in_grace_period(&self) -> bool {
        self.grace_period_end()
            .is_some_and(|ends_at| self.clock.now() < ends_at)
    }

    /// Starts (or restarts) the grace period from now.
    ///
    /// # Errors
    ///
    /// [`LicenseError::TokenStorageFailed`] if the record cannot be written.
    pub fn start_grace_period(&self) -> LicenseResult<()> {
        let record = GracePeriodRecord {
            started_at: self.clock.now(),
            reason: GRACE_REASON_SERVER_UNREACHABLE.to_string(),
        };
        self.store.store_grace_period(&record)?;
        info!(started_at = %record.started_at, "grace period started");
        Ok(())
    }

    /// Erases every stored token, the heartbeat record and the grace period.
    ///
    /// # Errors
    ///
    /// [`LicenseError::TokenStorageFailed`] if storage cannot be reset.
    pub fn clear_all(&self) -> LicenseResult<()> {
        self.store.clear_all()
    }

    // ── Access check ─────────────────────────────────────────────

    /// Decides whether the application may run.
    ///
    /// 1. The stored token validates: allow.
    /// 2. A refresh succeeds: allow.
    /// 3. A grace period is running: allow.
    /// 4. The server is unhealthy: start a grace period and allow.
    /// 5. Otherwise deny.
    ///
    /// On steps 1 to 3 a heartbeat is sent if due, and the expiry date is
    /// attached when the license expires within [`EXPIRY_WARNING_DAYS`].
    pub async fn check_access(&self, key: Option<&str>) -> AccessDecision {
        let reason = if self.is_valid(key) {
            AccessReason::Valid
        } else if self.refresh(key).await == Outcome::Success {
            AccessReason::Refreshed
        } else if self.is_in_grace_period() {
            AccessReason::GracePeriod
        } else if !self.is_server_healthy().await {
            if let Err(e) = self.start_grace_period() {
                warn!(error = %e, "could not record grace period");
            }
            return AccessDecision::Allowed {
                reason: AccessReason::GraceStarted,
                expiring_at: None,
            };
        } else {
            debug!("license check denied");
            return AccessDecision::Denied;
        };

        if let Outcome::Failed(reason) = self.heartbeat(key).await {
            debug!(%reason, "heartbeat during access check failed");
        }

        let expiring_at = if self.is_expiring_soon(EXPIRY_WARNING_DAYS, key) {
            self.stored_token(key)
                .and_then(|token| self.validator.expiration(&token))
        } else {
            None
        };

        AccessDecision::Allowed {
            reason,
            expiring_at,
        }
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn resolve_key<'a>(&'a self, key: Option<&'a str>) -> Option<&'a str> {
        key.map(str::trim)
            .filter(|k| !k.is_empty())
            .or_else(|| self.config.license_key())
    }

    fn require_key<'a>(&'a self, key: Option<&'a str>) -> LicenseResult<&'a str> {
        self.resolve_key(key).ok_or_else(|| {
            LicenseError::InvalidConfiguration("No license key provided".to_string())
        })
    }

    fn stored_token(&self, key: Option<&str>) -> Option<String> {
        let key = self.resolve_key(key)?;
        self.store.retrieve(key).ok().flatten()
    }

    fn heartbeat_due(&self) -> bool {
        match self.store.get_last_heartbeat() {
            Some(last) => self.clock.now() - last >= self.config.heartbeat_interval(),
            None => true,
        }
    }

    fn grace_period_end(&self) -> Option<DateTime<Utc>> {
        let record = self.store.get_grace_period()?;
        record.started_at.checked_add_signed(self.config.grace_period())
    }
}

/// Keeps the server's verdicts and configuration errors; folds everything
/// else into `ActivationFailed`.
fn activation_error(err: LicenseError) -> LicenseError {
    match err {
        LicenseError::InvalidLicenseKey
        | LicenseError::UsageExceeded
        | LicenseError::ActivationFailed(_)
        | LicenseError::InvalidConfiguration(_) => err,
        other => LicenseError::ActivationFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activation_errors_keep_server_verdicts() {
        assert!(matches!(
            activation_error(LicenseError::UsageExceeded),
            LicenseError::UsageExceeded
        ));
        assert!(matches!(
            activation_error(LicenseError::InvalidLicenseKey),
            LicenseError::InvalidLicenseKey
        ));
        assert!(matches!(
            activation_error(LicenseError::ServerUnreachable("down".into())),
            LicenseError::ActivationFailed(msg) if msg.contains("down")
        ));
        assert!(matches!(
            activation_error(LicenseError::TokenStorageFailed("disk full".into())),
            LicenseError::ActivationFailed(_)
        ));
    }

    #[test]
    fn skipped_counts_as_success() {
        assert!(Outcome::Success.is_success());
        assert!(Outcome::Skipped.is_success());
        assert!(!Outcome::Failed("x".into()).is_success());
    }

    #[test]
    fn grace_reasons() {
        assert!(AccessReason::GracePeriod.is_grace());
        assert!(AccessReason::GraceStarted.is_grace());
        assert!(!AccessReason::Refreshed.is_grace());
    }
}
