//! Device fingerprinting for license binding.
//!
//! A fingerprint is the hex SHA-256 of `hostname|machine-id|runtime|app
//! version|app secret`, skipping empty parts. It survives restarts and
//! changes when the host, the application secret, or either version changes.
//! Probing never fails: every unreadable attribute degrades to `"unknown"`
//! or to an omitted component.

use crate::config::LicensingConfig;
use keyward_crypto::{constant_time_eq, sha256_hex};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::sync::{Arc, OnceLock};

/// Delimiter between fingerprint components.
pub const COMPONENT_DELIMITER: &str = "|";

/// Value used when a host attribute cannot be read.
pub const UNKNOWN: &str = "unknown";

/// Identifies this library build in fingerprints and metadata.
pub const RUNTIME_VERSION: &str = concat!("keyward/", env!("CARGO_PKG_VERSION"));

/// Source of host identity attributes.
///
/// [`SystemProbe`] reads the real machine; tests substitute fixed values.
pub trait HostProbe: Send + Sync {
    /// Hostname, if it can be read.
    fn hostname(&self) -> Option<String>;
    /// Platform machine identifier (machine-id file, IOPlatformUUID, SMBIOS UUID).
    fn machine_id(&self) -> Option<String>;
    /// MAC address of the primary network interface.
    fn mac_address(&self) -> Option<String>;
}

/// A stable identifier for this device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceFingerprint(String);

impl DeviceFingerprint {
    /// Hashes already-collected components. Empty components are dropped
    /// rather than replaced, so `["a", "", "b"]` equals `["a", "b"]`.
    #[must_use]
    pub fn from_components(components: &[&str]) -> Self {
        let joined = components
            .iter()
            .filter(|c| !c.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(COMPONENT_DELIMITER);
        Self(sha256_hex(joined.as_bytes()))
    }

    /// Returns the hex fingerprint.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compares against a claimed fingerprint in constant time.
    #[must_use]
    pub fn matches(&self, claimed: &str) -> bool {
        constant_time_eq(self.0.as_bytes(), claimed.as_bytes())
    }
}

impl std::fmt::Display for DeviceFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Diagnostic host details sent alongside activation and heartbeat.
/// Not part of the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    /// Hostname.
    pub hostname: String,
    /// Operating system family.
    pub os: String,
    /// CPU architecture.
    pub arch: String,
    /// This library's version.
    pub runtime_version: String,
    /// Host application version.
    pub app_version: String,
    /// Deployment environment.
    pub environment: String,
    /// Host timezone.
    pub timezone: String,
}

impl DeviceMetadata {
    /// Flattens into a string map.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("hostname".to_string(), self.hostname.clone()),
            ("os".to_string(), self.os.clone()),
            ("arch".to_string(), self.arch.clone()),
            ("runtime_version".to_string(), self.runtime_version.clone()),
            ("app_version".to_string(), self.app_version.clone()),
            ("environment".to_string(), self.environment.clone()),
            ("timezone".to_string(), self.timezone.clone()),
        ])
    }
}

/// Computes fingerprints and metadata for the current host.
#[derive(Clone)]
pub struct FingerprintGenerator {
    app_secret: String,
    app_version: String,
    environment: String,
    timezone: String,
    probe: Arc<dyn HostProbe>,
}

impl std::fmt::Debug for FingerprintGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintGenerator")
            .field("app_version", &self.app_version)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

impl FingerprintGenerator {
    /// Creates a generator that probes the real host.
    #[must_use]
    pub fn new(config: &LicensingConfig) -> Self {
        Self::with_probe(config, Arc::new(SystemProbe))
    }

    /// Creates a generator backed by a custom probe.
    #[must_use]
    pub fn with_probe(config: &LicensingConfig, probe: Arc<dyn HostProbe>) -> Self {
        Self {
            app_secret: config.app_secret.clone(),
            app_version: config.app_version.clone(),
            environment: config.environment.clone(),
            timezone: config.timezone.clone(),
            probe,
        }
    }

    /// Generates the fingerprint of the current device.
    #[must_use]
    pub fn generate(&self) -> DeviceFingerprint {
        let hostname = self.hostname();
        let machine_id = self
            .probe
            .machine_id()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| self.probe.mac_address())
            .unwrap_or_else(|| UNKNOWN.to_string());

        DeviceFingerprint::from_components(&[
            &hostname,
            machine_id.trim(),
            RUNTIME_VERSION,
            &self.app_version,
            &self.app_secret,
        ])
    }

    /// Collects diagnostic metadata.
    #[must_use]
    pub fn metadata(&self) -> DeviceMetadata {
        DeviceMetadata {
            hostname: self.hostname(),
            os: env::consts::OS.to_string(),
            arch: env::consts::ARCH.to_string(),
            runtime_version: RUNTIME_VERSION.to_string(),
            app_version: self.app_version.clone(),
            environment: self.environment.clone(),
            timezone: self.timezone.clone(),
        }
    }

    fn hostname(&self) -> String {
        self.probe
            .hostname()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string())
    }
}

/// Reads identity attributes from the running machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl HostProbe for SystemProbe {
    fn hostname(&self) -> Option<String> {
        hostname::get().ok().and_then(|h| h.into_string().ok())
    }

    fn machine_id(&self) -> Option<String> {
        read_machine_id().filter(|id| !id.is_empty())
    }

    fn mac_address(&self) -> Option<String> {
        read_mac_address()
    }
}

/// Runs a command and returns its stdout, or `None` on any failure.
#[cfg_attr(target_os = "linux", allow(dead_code))]
fn command_output(program: &str, args: &[&str]) -> Option<String> {
    std::process::Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
}

fn read_machine_id() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/machine-id")
            .or_else(|_| std::fs::read_to_string("/var/lib/dbus/machine-id"))
            .ok()
            .map(|s| s.trim().to_string())
    }

    #[cfg(target_os = "macos")]
    {
        command_output("ioreg", &["-rd1", "-c", "IOPlatformExpertDevice"])
            .and_then(|out| parse_ioreg_uuid(&out))
    }

    #[cfg(target_os = "windows")]
    {
        command_output("wmic", &["csproduct", "get", "UUID"])
            .and_then(|out| out.lines().nth(1).map(|l| l.trim().to_string()))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}

fn read_mac_address() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        let mut interfaces: Vec<_> = std::fs::read_dir("/sys/class/net")
            .ok()?
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name != "lo")
            .collect();
        // read_dir order is unspecified; sort so the pick is stable.
        interfaces.sort();

        interfaces.iter().find_map(|iface| {
            std::fs::read_to_string(format!("/sys/class/net/{iface}/address"))
                .ok()
                .and_then(|addr| first_mac(&addr))
        })
    }

    #[cfg(target_os = "windows")]
    {
        command_output("getmac", &[]).and_then(|out| first_mac(&out))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        command_output("ifconfig", &["-a"]).and_then(|out| first_mac(&out))
    }
}

fn mac_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:[0-9a-fA-F]{2}[:-]){5}[0-9a-fA-F]{2}").expect("static regex")
    })
}

/// First non-zero MAC address in free-form command output.
fn first_mac(text: &str) -> Option<String> {
    mac_pattern()
        .find_iter(text)
        .map(|m| m.as_str().to_ascii_lowercase())
        .find(|mac| mac.chars().any(|c| c.is_ascii_hexdigit() && c != '0'))
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn parse_ioreg_uuid(output: &str) -> Option<String> {
    output
        .lines()
        .find(|l| l.contains("IOPlatformUUID"))
        .and_then(|l| l.split('"').nth(3))
        .map(String::from)
}
