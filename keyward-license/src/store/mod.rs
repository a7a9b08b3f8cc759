//! Durable token storage with a read-through cache.
//!
//! Layout under the configured storage directory:
//!
//! - `<sha256(license key)>.token`: sealed token, one per key
//! - `last_heartbeat`: Unix seconds of the last successful heartbeat
//! - `grace_period.json`: the active grace-period record, if any
//!
//! Files are replaced with a temp-file-and-rename so concurrent readers in
//! other processes see either the old or the new content, never a mix.
//! The directory is the source of truth; the cache is only written after the
//! durable write has succeeded.

pub mod cache;

use crate::clock::Clock;
use crate::config::LicensingConfig;
use crate::error::{LicenseError, LicenseResult};
use cache::TokenCache;
use chrono::{DateTime, Utc};
use keyward_crypto::{derive_key, open, seal, sha256_hex, KdfParams, Salt, SealingKey};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Token file extension.
pub const TOKEN_EXTENSION: &str = "token";

/// Heartbeat timestamp file name.
pub const HEARTBEAT_FILE: &str = "last_heartbeat";

/// Grace-period record file name.
pub const GRACE_PERIOD_FILE: &str = "grace_period.json";

/// Reason recorded when a grace period starts because the server is down.
pub const GRACE_REASON_SERVER_UNREACHABLE: &str = "server_unreachable";

/// Record key used when the caller passes `None`.
pub const DEFAULT_KEY: &str = "default";

/// Prefix of cache keys: `licensing:token:<license key>`.
pub const CACHE_PREFIX: &str = "licensing";

/// Salt context for the at-rest key.
const SEALING_CONTEXT: &str = "keyward.token-store.v1";

/// Durable record of an active grace period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GracePeriodRecord {
    /// When the grace period began.
    pub started_at: DateTime<Utc>,
    /// Why it began.
    pub reason: String,
}

/// Derives the at-rest sealing key from the configured application secret.
///
/// # Errors
///
/// Returns [`LicenseError::InvalidConfiguration`] if derivation fails.
pub fn derive_sealing_key(config: &LicensingConfig) -> LicenseResult<SealingKey> {
    if config.app_secret.is_empty() {
        warn!("app_secret is empty; stored tokens are sealed with a publicly derivable key");
    }
    derive_key(
        &config.app_secret,
        &Salt::from_context(SEALING_CONTEXT),
        &KdfParams::default(),
    )
    .map_err(|e| LicenseError::InvalidConfiguration(format!("sealing key: {e}")))
}

/// Persists tokens, heartbeat and grace-period state.
pub struct TokenStore {
    dir: PathBuf,
    key: SealingKey,
    cache: Arc<dyn TokenCache>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl TokenStore {
    /// Opens (and creates if needed) the storage directory from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::TokenStorageFailed`] if the directory cannot
    /// be created.
    pub fn new(
        config: &LicensingConfig,
        key: SealingKey,
        cache: Arc<dyn TokenCache>,
        clock: Arc<dyn Clock>,
    ) -> LicenseResult<Self> {
        let store = Self {
            dir: config.storage_path.clone(),
            key,
            cache,
            clock,
        };
        store.ensure_dir()?;
        Ok(store)
    }

    /// The storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Seals and writes `token` under `key` ([`DEFAULT_KEY`] if `None`),
    /// then updates the cache.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::TokenStorageFailed`] on any sealing or I/O
    /// failure. The cache is left untouched in that case.
    pub fn store<'k>(&self, token: &str, key: impl Into<Option<&'k str>>) -> LicenseResult<()> {
        let key = record_key(key.into());
        let file_name = token_file_name(key);
        let sealed = seal(&self.key, token.as_bytes(), file_name.as_bytes())
            .map_err(|e| LicenseError::TokenStorageFailed(e.to_string()))?;

        self.write_atomic(&file_name, sealed.as_bytes())?;
        self.cache.put(&self.cache_key(key), token);

        debug!(file = %file_name, "stored license token");
        Ok(())
    }

    /// Returns the token stored under `key`, consulting the cache first.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidToken`] if a token file exists but
    /// cannot be read or opened. A damaged store is never reported as "no
    /// token".
    pub fn retrieve<'k>(&self, key: impl Into<Option<&'k str>>) -> LicenseResult<Option<String>> {
        let key = record_key(key.into());
        let cache_key = self.cache_key(key);
        if let Some(token) = self.cache.get(&cache_key) {
            return Ok(Some(token));
        }

        let file_name = token_file_name(key);
        let sealed = match fs::read_to_string(self.dir.join(&file_name)) {
            Ok(sealed) => sealed,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LicenseError::InvalidToken(format!(
                    "stored token unreadable: {e}"
                )));
            }
        };

        let plaintext = open(&self.key, &sealed, file_name.as_bytes()).map_err(|e| {
            warn!(file = %file_name, error = %e, "stored token failed to open");
            LicenseError::InvalidToken(format!("stored token: {e}"))
        })?;
        let token = String::from_utf8(plaintext)
            .map_err(|_| LicenseError::InvalidToken("stored token is not UTF-8".to_string()))?;

        self.cache.put(&cache_key, &token);
        Ok(Some(token))
    }

    /// Removes the token stored under `key` from disk and cache.
    /// Missing entries are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::TokenStorageFailed`] if the file exists but
    /// cannot be removed.
    pub fn delete<'k>(&self, key: impl Into<Option<&'k str>>) -> LicenseResult<()> {
        let key = record_key(key.into());
        self.cache.forget(&self.cache_key(key));
        remove_if_exists(&self.dir.join(token_file_name(key)))
    }

    /// Returns true if a token file exists for `key`. Ignores the cache.
    #[must_use]
    pub fn exists<'k>(&self, key: impl Into<Option<&'k str>>) -> bool {
        self.dir
            .join(token_file_name(record_key(key.into())))
            .is_file()
    }

    /// Records "now" as the last successful heartbeat.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::TokenStorageFailed`] on I/O failure.
    pub fn store_last_heartbeat(&self) -> LicenseResult<()> {
        let now = self.clock.now().timestamp();
        self.write_atomic(HEARTBEAT_FILE, now.to_string().as_bytes())
    }

    /// Time of the last successful heartbeat, if one was recorded.
    #[must_use]
    pub fn get_last_heartbeat(&self) -> Option<DateTime<Utc>> {
        let raw = fs::read_to_string(self.dir.join(HEARTBEAT_FILE)).ok()?;
        match raw.trim().parse::<i64>() {
            Ok(secs) => DateTime::from_timestamp(secs, 0),
            Err(e) => {
                warn!(error = %e, "ignoring unparseable heartbeat record");
                None
            }
        }
    }

    /// Writes (or replaces) the grace-period record.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::TokenStorageFailed`] on I/O failure.
    pub fn store_grace_period(&self, record: &GracePeriodRecord) -> LicenseResult<()> {
        let json = serde_json::to_vec(record)?;
        self.write_atomic(GRACE_PERIOD_FILE, &json)
    }

    /// The current grace-period record, if any.
    #[must_use]
    pub fn get_grace_period(&self) -> Option<GracePeriodRecord> {
        let raw = fs::read(self.dir.join(GRACE_PERIOD_FILE)).ok()?;
        serde_json::from_slice(&raw)
            .inspect_err(|e| warn!(error = %e, "ignoring unparseable grace-period record"))
            .ok()
    }

    /// Erases the whole storage directory and flushes the cache.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::TokenStorageFailed`] if the directory cannot be
    /// removed or recreated.
    pub fn clear_all(&self) -> LicenseResult<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(storage_error(&self.dir, e)),
        }
        self.cache.flush();
        self.ensure_dir()?;
        debug!(dir = %self.dir.display(), "cleared license storage");
        Ok(())
    }

    fn cache_key(&self, key: &str) -> String {
        format!("{CACHE_PREFIX}:token:{key}")
    }

    fn ensure_dir(&self) -> LicenseResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| storage_error(&self.dir, e))
    }

    fn write_atomic(&self, file_name: &str, contents: &[u8]) -> LicenseResult<()> {
        // Another process may have cleared the directory since we opened it.
        self.ensure_dir()?;

        let target = self.dir.join(file_name);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| storage_error(&self.dir, e))?;
        tmp.write_all(contents)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| storage_error(&target, e))?;
        tmp.persist(&target)
            .map_err(|e| storage_error(&target, e.error))?;
        Ok(())
    }
}

/// File name for a license key's token. The key itself never appears on disk.
#[must_use]
pub fn token_file_name(key: &str) -> String {
    format!("{}.{TOKEN_EXTENSION}", sha256_hex(key.as_bytes()))
}

fn record_key(key: Option<&str>) -> &str {
    key.unwrap_or(DEFAULT_KEY)
}

fn remove_if_exists(path: &Path) -> LicenseResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(storage_error(path, e)),
    }
}

fn storage_error(path: &Path, err: io::Error) -> LicenseError {
    LicenseError::TokenStorageFailed(format!("{}: {err}", path.display()))
}
