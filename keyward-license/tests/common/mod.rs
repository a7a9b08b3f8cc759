//! Shared test helpers for licensing tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use ed25519_dalek::SigningKey;
use keyward_crypto::SealingKey;
use keyward_license::api::{
    DeactivationResponse, HeartbeatData, HeartbeatResponse, LicensingApi, TokenResponse,
    ValidationResponse,
};
use keyward_license::store::cache::NoopCache;
use keyward_license::token::paseto;
use keyward_license::{
    DeviceMetadata, FingerprintGenerator, FixedClock, HostProbe, LicenseClaims, LicenseClient,
    LicenseError, LicenseResult, LicensingConfig,
};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const LICENSE_KEY: &str = "KW-TEST-0001";

/// Fixed "now" for every clock in the tests.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap()
}

pub fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(now()))
}

/// Returns a deterministic Ed25519 signing key from a fixed seed.
pub fn signing_key() -> SigningKey {
    let seed: [u8; 32] = [
        1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24,
        25, 26, 27, 28, 29, 30, 31, 32,
    ];
    SigningKey::from_bytes(&seed)
}

/// A different key, for forged tokens.
pub fn rogue_signing_key() -> SigningKey {
    SigningKey::from_bytes(&[9u8; 32])
}

pub fn public_key_paserk() -> String {
    paseto::to_paserk(&signing_key().verifying_key())
}

/// At-rest key that skips Argon2 in tests.
pub fn sealing_key() -> SealingKey {
    SealingKey::from_bytes([7u8; 32])
}

/// Host attributes that never change between runs.
#[derive(Debug, Clone)]
pub struct FixedProbe {
    pub hostname: Option<String>,
    pub machine_id: Option<String>,
    pub mac: Option<String>,
}

impl Default for FixedProbe {
    fn default() -> Self {
        Self {
            hostname: Some("build-host".to_string()),
            machine_id: Some("4c4c4544-0042-3510-8048-b7c04f4e3332".to_string()),
            mac: Some("02:42:ac:11:00:02".to_string()),
        }
    }
}

impl HostProbe for FixedProbe {
    fn hostname(&self) -> Option<String> {
        self.hostname.clone()
    }

    fn machine_id(&self) -> Option<String> {
        self.machine_id.clone()
    }

    fn mac_address(&self) -> Option<String> {
        self.mac.clone()
    }
}

pub fn probe() -> Arc<dyn HostProbe> {
    Arc::new(FixedProbe::default())
}

/// Config rooted in `dir` that trusts [`signing_key`].
pub fn test_config(dir: &Path) -> LicensingConfig {
    LicensingConfig {
        server_url: "http://127.0.0.1:9".to_string(),
        license_key: Some(LICENSE_KEY.to_string()),
        public_key: Some(public_key_paserk()),
        app_secret: "test-app-secret".to_string(),
        app_version: "2.4.1".to_string(),
        environment: "testing".to_string(),
        storage_path: dir.to_path_buf(),
        timeout_secs: 2,
        ..LicensingConfig::default()
    }
}

pub fn fingerprints(config: &LicensingConfig) -> FingerprintGenerator {
    FingerprintGenerator::with_probe(config, probe())
}

/// Fingerprint of the fixed test host under `config`.
pub fn device_fingerprint(config: &LicensingConfig) -> String {
    fingerprints(config).generate().as_str().to_string()
}

/// Claims for a healthy, bound, 30-day license.
pub fn valid_claims(config: &LicensingConfig) -> LicenseClaims {
    LicenseClaims {
        license_key: Some(LICENSE_KEY.to_string()),
        fingerprint: Some(device_fingerprint(config)),
        exp: Some(now() + Duration::days(30)),
        iat: Some(now() - Duration::days(1)),
        max_usages: Some(5),
        current_usages: Some(1),
        customer_name: Some("Ada Lovelace".to_string()),
        customer_email: Some("ada@example.com".to_string()),
        features: vec!["export".to_string(), "sync".to_string()],
        metadata: Map::new(),
    }
}

pub fn sign_claims(claims: &LicenseClaims) -> String {
    sign_claims_with(&signing_key(), claims)
}

pub fn sign_claims_with(key: &SigningKey, claims: &LicenseClaims) -> String {
    let message = serde_json::to_vec(claims).unwrap();
    paseto::sign(key, &message, b"")
}

/// Client wired to `api`, a fixed clock and no token cache.
pub fn client_with(
    config: LicensingConfig,
    api: Arc<dyn LicensingApi>,
    clock: Arc<FixedClock>,
) -> LicenseClient {
    LicenseClient::builder(config)
        .api(api)
        .clock(clock)
        .probe(probe())
        .cache(Arc::new(NoopCache))
        .sealing_key(sealing_key())
        .build()
        .unwrap()
}

// ── Fake licensing API ───────────────────────────────────────────

type Reply<T> = Box<dyn Fn() -> LicenseResult<T> + Send + Sync>;

/// Scripted stand-in for the licensing server.
#[derive(Default)]
pub struct FakeApi {
    pub activate_result: Mutex<Option<Reply<TokenResponse>>>,
    pub refresh_result: Mutex<Option<Reply<TokenResponse>>>,
    pub deactivate_result: Mutex<Option<Reply<DeactivationResponse>>>,
    pub heartbeat_response: Mutex<Option<HeartbeatResponse>>,
    pub healthy: Mutex<bool>,
    pub activate_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub deactivate_calls: AtomicUsize,
    pub heartbeat_calls: AtomicUsize,
    pub health_calls: AtomicUsize,
    pub last_heartbeat_data: Mutex<Option<HeartbeatData>>,
    pub last_fingerprint: Mutex<Option<String>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            healthy: Mutex::new(true),
            ..Self::default()
        })
    }

    pub fn on_activate(&self, reply: impl Fn() -> LicenseResult<TokenResponse> + Send + Sync + 'static) {
        *self.activate_result.lock().unwrap() = Some(Box::new(reply));
    }

    pub fn on_refresh(&self, reply: impl Fn() -> LicenseResult<TokenResponse> + Send + Sync + 'static) {
        *self.refresh_result.lock().unwrap() = Some(Box::new(reply));
    }

    pub fn on_deactivate(&self, reply: impl Fn() -> LicenseResult<DeactivationResponse> + Send + Sync + 'static) {
        *self.deactivate_result.lock().unwrap() = Some(Box::new(reply));
    }

    pub fn on_heartbeat(&self, response: HeartbeatResponse) {
        *self.heartbeat_response.lock().unwrap() = Some(response);
    }

    pub fn set_healthy(&self, healthy: bool) {
        *self.healthy.lock().unwrap() = healthy;
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub fn token_response(token: &str) -> TokenResponse {
    TokenResponse {
        token: Some(token.to_string()),
        extra: Map::new(),
    }
}

fn reply_or<T>(slot: &Mutex<Option<Reply<T>>>, fallback: LicenseResult<T>) -> LicenseResult<T> {
    match slot.lock().unwrap().as_ref() {
        Some(reply) => reply(),
        None => fallback,
    }
}

#[async_trait]
impl LicensingApi for FakeApi {
    async fn activate(
        &self,
        _license_key: &str,
        fingerprint: &str,
        _metadata: &DeviceMetadata,
    ) -> LicenseResult<TokenResponse> {
        self.activate_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_fingerprint.lock().unwrap() = Some(fingerprint.to_string());
        reply_or(
            &self.activate_result,
            Err(LicenseError::ServerUnreachable("not scripted".into())),
        )
    }

    async fn deactivate(
        &self,
        _license_key: &str,
        _fingerprint: &str,
    ) -> LicenseResult<DeactivationResponse> {
        self.deactivate_calls.fetch_add(1, Ordering::SeqCst);
        reply_or(
            &self.deactivate_result,
            Ok(DeactivationResponse {
                success: true,
                extra: Map::new(),
            }),
        )
    }

    async fn refresh(&self, _license_key: &str, _fingerprint: &str) -> LicenseResult<TokenResponse> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        reply_or(
            &self.refresh_result,
            Err(LicenseError::ServerUnreachable("not scripted".into())),
        )
    }

    async fn heartbeat(
        &self,
        _license_key: &str,
        _fingerprint: &str,
        data: &HeartbeatData,
    ) -> HeartbeatResponse {
        self.heartbeat_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_heartbeat_data.lock().unwrap() = Some(data.clone());
        self.heartbeat_response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(HeartbeatResponse {
                success: true,
                token: None,
                error: None,
            })
    }

    async fn validate(
        &self,
        _license_key: &str,
        _fingerprint: &str,
    ) -> LicenseResult<ValidationResponse> {
        Ok(ValidationResponse {
            valid: true,
            extra: Map::new(),
        })
    }

    async fn license_info(&self, license_key: &str) -> LicenseResult<Map<String, Value>> {
        let mut info = Map::new();
        info.insert("license_key".into(), Value::String(license_key.to_string()));
        Ok(info)
    }

    async fn health(&self) -> bool {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        *self.healthy.lock().unwrap()
    }
}
