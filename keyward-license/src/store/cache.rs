//! Volatile token cache in front of the durable store.

use crate::config::CacheConfig;
use moka::sync::Cache;
use std::sync::Arc;

/// A process-local cache of raw tokens.
///
/// Implementations only ever hold copies of what the durable store already
/// has; losing an entry is always safe.
pub trait TokenCache: Send + Sync {
    /// Returns the cached value, if present and fresh.
    fn get(&self, key: &str) -> Option<String>;
    /// Inserts or replaces a value.
    fn put(&self, key: &str, value: &str);
    /// Removes a value.
    fn forget(&self, key: &str);
    /// Removes every value.
    fn flush(&self);
}

/// Builds the cache described by `config`: moka when enabled, no-op otherwise.
#[must_use]
pub fn from_config(config: &CacheConfig) -> Arc<dyn TokenCache> {
    if config.enabled {
        Arc::new(MokaTokenCache::new(
            config.max_capacity,
            std::time::Duration::from_secs(config.ttl_secs),
        ))
    } else {
        Arc::new(NoopCache)
    }
}

/// In-memory TTL cache backed by moka.
pub struct MokaTokenCache {
    inner: Cache<String, String>,
}

impl MokaTokenCache {
    /// Creates a cache holding at most `capacity` entries for `ttl` each.
    #[must_use]
    pub fn new(capacity: u64, ttl: std::time::Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Number of live entries (approximate; moka counts lazily).
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

impl TokenCache for MokaTokenCache {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: &str) {
        self.inner.insert(key.to_string(), value.to_string());
    }

    fn forget(&self, key: &str) {
        self.inner.invalidate(key);
    }

    fn flush(&self) {
        self.inner.invalidate_all();
    }
}

/// Cache that never holds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl TokenCache for NoopCache {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn put(&self, _key: &str, _value: &str) {}

    fn forget(&self, _key: &str) {}

    fn flush(&self) {}
}
