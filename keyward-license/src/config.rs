//! Client configuration.
//!
//! [`LicensingConfig`] is a plain value handed to every component's
//! constructor. Loading from the environment or a TOML file is a convenience
//! layered on top; nothing reads configuration ambiently.

use crate::error::{LicenseError, LicenseResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix, e.g. `LICENSING_SERVER_URL`,
/// `LICENSING_CACHE__TTL_SECS`.
pub const ENV_PREFIX: &str = "LICENSING";

/// Optional config file picked up by [`LicensingConfig::from_env`].
pub const DEFAULT_CONFIG_FILE: &str = "licensing";

/// The in-process cache backend.
pub const CACHE_STORE_MEMORY: &str = "memory";

/// Token cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Mirror stored tokens in memory.
    pub enabled: bool,
    /// Cache backend. Only `memory` (in-process) is supported.
    pub store: String,
    /// Time-to-live of cached tokens, in seconds.
    pub ttl_secs: u64,
    /// Upper bound on cached entries.
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store: CACHE_STORE_MEMORY.to_string(),
            ttl_secs: 3600,
            max_capacity: 1024,
        }
    }
}

/// Heartbeat settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Send heartbeats at all.
    pub enabled: bool,
    /// Minimum seconds between two heartbeats.
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
        }
    }
}

/// Everything the licensing client needs to know about its environment.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LicensingConfig {
    /// Base URL of the licensing server.
    pub server_url: String,
    /// API version path segment.
    pub api_version: String,
    /// License key used when an operation is not given one explicitly.
    pub license_key: Option<String>,
    /// Ed25519 verification key (PASERK `k4.public.…`, base64 or hex).
    pub public_key: Option<String>,
    /// Application secret. Part of the device fingerprint and the source of
    /// the at-rest sealing key.
    pub app_secret: String,
    /// Host application version; part of the fingerprint.
    pub app_version: String,
    /// Deployment environment name, reported in metadata.
    pub environment: String,
    /// Host timezone, reported in metadata.
    pub timezone: String,
    /// Directory holding token, heartbeat and grace-period files.
    pub storage_path: PathBuf,
    /// Token cache settings.
    pub cache: CacheConfig,
    /// Heartbeat settings.
    pub heartbeat: HeartbeatConfig,
    /// Length of the offline grace period, in days.
    pub grace_period_days: u32,
    /// Per-request timeout for the licensing API, in seconds.
    pub timeout_secs: u64,
    /// Verbose logging.
    pub debug: bool,
}

impl Default for LicensingConfig {
    fn default() -> Self {
        Self {
            server_url: "https://licensing.example.com".to_string(),
            api_version: "v1".to_string(),
            license_key: None,
            public_key: None,
            app_secret: String::new(),
            app_version: String::new(),
            environment: "production".to_string(),
            timezone: "UTC".to_string(),
            storage_path: default_storage_path(),
            cache: CacheConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            grace_period_days: 7,
            timeout_secs: 30,
            debug: false,
        }
    }
}

impl std::fmt::Debug for LicensingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicensingConfig")
            .field("server_url", &self.server_url)
            .field("api_version", &self.api_version)
            .field("license_key", &self.license_key.as_ref().map(|_| "[REDACTED]"))
            .field("public_key", &self.public_key)
            .field("app_secret", &"[REDACTED]")
            .field("app_version", &self.app_version)
            .field("environment", &self.environment)
            .field("timezone", &self.timezone)
            .field("storage_path", &self.storage_path)
            .field("cache", &self.cache)
            .field("heartbeat", &self.heartbeat)
            .field("grace_period_days", &self.grace_period_days)
            .field("timeout_secs", &self.timeout_secs)
            .field("debug", &self.debug)
            .finish()
    }
}

impl LicensingConfig {
    /// Loads defaults, then `licensing.toml` if present, then `LICENSING_*`
    /// environment variables (`__` separates nested keys).
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidConfiguration`] if a source cannot be
    /// parsed or the result fails [`validate`](Self::validate).
    pub fn from_env() -> LicenseResult<Self> {
        Self::load(
            config::File::with_name(DEFAULT_CONFIG_FILE)
                .required(false)
                .format(config::FileFormat::Toml),
        )
    }

    /// Like [`from_env`](Self::from_env) but with an explicit, required file.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidConfiguration`] if the file is missing
    /// or invalid.
    pub fn from_file(path: &Path) -> LicenseResult<Self> {
        Self::load(config::File::from(path).format(config::FileFormat::Toml))
    }

    fn load<S>(file: S) -> LicenseResult<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let defaults = config::Config::try_from(&Self::default())
            .map_err(|e| LicenseError::InvalidConfiguration(e.to_string()))?;

        let loaded: Self = config::Config::builder()
            .add_source(defaults)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(|e| LicenseError::InvalidConfiguration(e.to_string()))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Checks internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidConfiguration`] describing the first
    /// problem found.
    pub fn validate(&self) -> LicenseResult<()> {
        let url = url::Url::parse(&self.server_url).map_err(|e| {
            LicenseError::InvalidConfiguration(format!("server_url {:?}: {e}", self.server_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(LicenseError::InvalidConfiguration(format!(
                "server_url must be http(s), got {}",
                url.scheme()
            )));
        }
        if self.api_version.trim().is_empty() {
            return Err(LicenseError::InvalidConfiguration(
                "api_version must not be empty".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(LicenseError::InvalidConfiguration(
                "timeout_secs must be positive".to_string(),
            ));
        }
        if self.heartbeat.enabled && self.heartbeat.interval_secs == 0 {
            return Err(LicenseError::InvalidConfiguration(
                "heartbeat.interval_secs must be positive".to_string(),
            ));
        }
        if self.cache.enabled && self.cache.store != CACHE_STORE_MEMORY {
            return Err(LicenseError::InvalidConfiguration(format!(
                "unsupported cache.store {:?}",
                self.cache.store
            )));
        }
        if self.cache.enabled && self.cache.ttl_secs == 0 {
            return Err(LicenseError::InvalidConfiguration(
                "cache.ttl_secs must be positive".to_string(),
            ));
        }
        if self.storage_path.as_os_str().is_empty() {
            return Err(LicenseError::InvalidConfiguration(
                "storage_path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The configured license key, if non-blank.
    #[must_use]
    pub fn license_key(&self) -> Option<&str> {
        self.license_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Cache TTL as a [`Duration`].
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    /// Heartbeat interval as a [`chrono::Duration`].
    #[must_use]
    pub fn heartbeat_interval(&self) -> chrono::Duration {
        i64::try_from(self.heartbeat.interval_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Grace period length as a [`chrono::Duration`].
    #[must_use]
    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.grace_period_days))
    }
}

/// `<local data dir>/keyward`, falling back to the temp dir.
fn default_storage_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("keyward")
}
