mod common;

use chrono::Duration;
use common::{clock, now, sealing_key, test_config};
use keyward_crypto::SealingKey;
use keyward_license::store::cache::{MokaTokenCache, NoopCache, TokenCache};
use keyward_license::store::{
    token_file_name, DEFAULT_KEY, GRACE_PERIOD_FILE, HEARTBEAT_FILE, GRACE_REASON_SERVER_UNREACHABLE,
};
use keyward_license::{FixedClock, GracePeriodRecord, LicenseError, TokenStore};
use std::fs;
use std::sync::Arc;

fn store_with(
    dir: &std::path::Path,
    cache: Arc<dyn TokenCache>,
    clock: Arc<FixedClock>,
) -> TokenStore {
    TokenStore::new(&test_config(dir), sealing_key(), cache, clock).unwrap()
}

fn uncached(dir: &std::path::Path) -> TokenStore {
    store_with(dir, Arc::new(NoopCache), clock())
}

// ── Tokens ───────────────────────────────────────────────────────

#[test]
fn store_then_retrieve() {
    let dir = tempfile::tempdir().unwrap();
    let store = uncached(dir.path());

    store.store("v4.public.token-a", "key-a").unwrap();
    assert_eq!(
        store.retrieve("key-a").unwrap().as_deref(),
        Some("v4.public.token-a")
    );
    assert!(store.exists("key-a"));
}

#[test]
fn missing_token_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let store = uncached(dir.path());
    assert_eq!(store.retrieve("nobody").unwrap(), None);
    assert!(!store.exists("nobody"));
}

#[test]
fn missing_key_uses_default_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = uncached(dir.path());
    store.store("v4.public.default", None).unwrap();

    assert!(store.exists(None));
    assert!(dir.path().join(token_file_name(DEFAULT_KEY)).is_file());
    assert_eq!(
        store.retrieve(DEFAULT_KEY).unwrap().as_deref(),
        Some("v4.public.default")
    );

    store.delete(None).unwrap();
    assert_eq!(store.retrieve(None).unwrap(), None);
}

#[test]
fn keys_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let store = uncached(dir.path());
    store.store("token-a", "a").unwrap();
    store.store("token-b", "b").unwrap();

    assert_eq!(store.retrieve("a").unwrap().as_deref(), Some("token-a"));
    assert_eq!(store.retrieve("b").unwrap().as_deref(), Some("token-b"));
}

#[test]
fn overwrite_replaces_token() {
    let dir = tempfile::tempdir().unwrap();
    let store = uncached(dir.path());
    store.store("old", "k").unwrap();
    store.store("new", "k").unwrap();
    assert_eq!(store.retrieve("k").unwrap().as_deref(), Some("new"));
}

#[test]
fn file_name_hides_license_key() {
    let dir = tempfile::tempdir().unwrap();
    let store = uncached(dir.path());
    store.store("secret-token", "KW-PRIVATE-KEY").unwrap();

    let name = token_file_name("KW-PRIVATE-KEY");
    assert_eq!(name.len(), 64 + ".token".len());
    assert!(!name.contains("KW-PRIVATE-KEY"));

    let on_disk = fs::read_to_string(dir.path().join(&name)).unwrap();
    assert!(!on_disk.contains("secret-token"));
}

#[test]
fn no_temp_files_left_behind() {
    let dir = tempfile::tempdir().unwrap();
    let store = uncached(dir.path());
    store.store("t", "k").unwrap();
    store.store_last_heartbeat().unwrap();

    let mut names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    let mut expected = vec![token_file_name("k"), HEARTBEAT_FILE.to_string()];
    expected.sort();
    assert_eq!(names, expected);
}

#[test]
fn corrupted_file_is_invalid_token() {
    let dir = tempfile::tempdir().unwrap();
    let store = uncached(dir.path());
    store.store("t", "k").unwrap();
    let garbage = format!("kw1.{}", "A".repeat(48));
    fs::write(dir.path().join(token_file_name("k")), garbage).unwrap();

    assert!(matches!(
        store.retrieve("k"),
        Err(LicenseError::InvalidToken(_))
    ));
}

#[test]
fn wrong_sealing_key_is_invalid_token() {
    let dir = tempfile::tempdir().unwrap();
    uncached(dir.path()).store("t", "k").unwrap();

    let other = TokenStore::new(
        &test_config(dir.path()),
        SealingKey::from_bytes([8u8; 32]),
        Arc::new(NoopCache),
        clock(),
    )
    .unwrap();
    assert!(matches!(other.retrieve("k"), Err(LicenseError::InvalidToken(_))));
}

#[test]
fn swapped_files_do_not_open() {
    let dir = tempfile::tempdir().unwrap();
    let store = uncached(dir.path());
    store.store("token-a", "a").unwrap();
    fs::copy(
        dir.path().join(token_file_name("a")),
        dir.path().join(token_file_name("b")),
    )
    .unwrap();

    assert!(matches!(store.retrieve("b"), Err(LicenseError::InvalidToken(_))));
}

#[test]
fn delete_removes_token_and_tolerates_absence() {
    let dir = tempfile::tempdir().unwrap();
    let store = uncached(dir.path());
    store.store("t", "k").unwrap();

    store.delete("k").unwrap();
    assert_eq!(store.retrieve("k").unwrap(), None);
    assert!(!store.exists("k"));
    store.delete("k").unwrap();
}

// ── Cache ────────────────────────────────────────────────────────

#[test]
fn cache_is_written_through() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(MokaTokenCache::new(16, std::time::Duration::from_secs(60)));
    let store = store_with(dir.path(), cache.clone(), clock());

    store.store("t", "k").unwrap();
    assert_eq!(cache.get("licensing:token:k").as_deref(), Some("t"));
}

#[test]
fn cache_serves_reads_first() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(MokaTokenCache::new(16, std::time::Duration::from_secs(60)));
    let store = store_with(dir.path(), cache.clone(), clock());
    store.store("t", "k").unwrap();

    fs::remove_file(dir.path().join(token_file_name("k"))).unwrap();
    assert_eq!(store.retrieve("k").unwrap().as_deref(), Some("t"));
    // exists() only trusts the durable record
    assert!(!store.exists("k"));
}

#[test]
fn cache_repopulated_on_miss() {
    let dir = tempfile::tempdir().unwrap();
    uncached(dir.path()).store("t", "k").unwrap();

    let cache = Arc::new(MokaTokenCache::new(16, std::time::Duration::from_secs(60)));
    let store = store_with(dir.path(), cache.clone(), clock());
    assert_eq!(cache.entry_count(), 0);

    assert_eq!(store.retrieve("k").unwrap().as_deref(), Some("t"));
    assert_eq!(cache.get("licensing:token:k").as_deref(), Some("t"));
}

#[test]
fn delete_evicts_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(MokaTokenCache::new(16, std::time::Duration::from_secs(60)));
    let store = store_with(dir.path(), cache.clone(), clock());
    store.store("t", "k").unwrap();

    store.delete("k").unwrap();
    assert_eq!(cache.get("licensing:token:k"), None);
    assert_eq!(store.retrieve("k").unwrap(), None);
}

#[test]
fn failed_write_leaves_cache_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("store");
    let cache = Arc::new(MokaTokenCache::new(16, std::time::Duration::from_secs(60)));
    let store = store_with(&root, cache.clone(), clock());

    // Replace the directory with a file so the write cannot succeed.
    fs::remove_dir_all(&root).unwrap();
    fs::write(&root, b"not a directory").unwrap();

    assert!(matches!(
        store.store("t", "k"),
        Err(LicenseError::TokenStorageFailed(_))
    ));
    assert_eq!(cache.get("licensing:token:k"), None);
}

// ── Heartbeat and grace records ──────────────────────────────────

#[test]
fn heartbeat_roundtrip_uses_clock() {
    let dir = tempfile::tempdir().unwrap();
    let store = uncached(dir.path());
    assert_eq!(store.get_last_heartbeat(), None);

    store.store_last_heartbeat().unwrap();
    assert_eq!(store.get_last_heartbeat(), Some(now()));

    let raw = fs::read_to_string(dir.path().join(HEARTBEAT_FILE)).unwrap();
    assert_eq!(raw, now().timestamp().to_string());
}

#[test]
fn garbage_heartbeat_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let store = uncached(dir.path());
    fs::write(dir.path().join(HEARTBEAT_FILE), "yesterday").unwrap();
    assert_eq!(store.get_last_heartbeat(), None);
}

#[test]
fn grace_period_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = uncached(dir.path());
    assert_eq!(store.get_grace_period(), None);

    let record = GracePeriodRecord {
        started_at: now() - Duration::days(2),
        reason: GRACE_REASON_SERVER_UNREACHABLE.to_string(),
    };
    store.store_grace_period(&record).unwrap();
    assert_eq!(store.get_grace_period(), Some(record));

    let raw = fs::read_to_string(dir.path().join(GRACE_PERIOD_FILE)).unwrap();
    assert!(raw.contains("\"reason\":\"server_unreachable\""));
}

#[test]
fn garbage_grace_record_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let store = uncached(dir.path());
    fs::write(dir.path().join(GRACE_PERIOD_FILE), "{not json").unwrap();
    assert_eq!(store.get_grace_period(), None);
}

// ── Clearing ─────────────────────────────────────────────────────

#[test]
fn clear_all_empties_everything() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("licensing");
    let cache = Arc::new(MokaTokenCache::new(16, std::time::Duration::from_secs(60)));
    let store = store_with(&root, cache.clone(), clock());

    store.store("a", "key-a").unwrap();
    store.store("b", "key-b").unwrap();
    store.store_last_heartbeat().unwrap();
    store
        .store_grace_period(&GracePeriodRecord {
            started_at: now(),
            reason: "test".into(),
        })
        .unwrap();

    store.clear_all().unwrap();

    assert!(root.is_dir());
    assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
    assert_eq!(cache.get("licensing:token:key-b"), None);
    assert_eq!(store.retrieve("key-a").unwrap(), None);
    assert_eq!(store.get_last_heartbeat(), None);
    assert_eq!(store.get_grace_period(), None);

    // Still usable afterwards.
    store.store("c", "key-c").unwrap();
    assert_eq!(store.retrieve("key-c").unwrap().as_deref(), Some("c"));
}

#[test]
fn new_creates_nested_directory() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("a").join("b");
    let store = uncached(&root);
    assert!(root.is_dir());
    assert_eq!(store.dir(), root.as_path());
}
