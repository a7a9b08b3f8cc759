//! Device-bound licensing client.
//!
//! This crate proves, mostly offline, that an installation holds a valid
//! license for the machine it runs on:
//! - Device fingerprinting (hashed host identity plus the application secret)
//! - PASETO v4.public license tokens verified with Ed25519
//! - Encrypted on-disk token storage behind an in-memory cache
//! - Server refresh, heartbeat and an offline grace period when the licensing
//!   server cannot be reached
//!
//! # Design Principles
//!
//! - **Local first**: validity is decided from the stored token; the server
//!   is only asked when that fails or a heartbeat is due
//! - **Fail closed on integrity**: a forged, tampered, expired or foreign
//!   token is never accepted, grace period or not
//! - **Fail open on availability**: an unreachable server starts a bounded
//!   grace period instead of locking the user out
//!
//! # Example
//!
//! ```no_run
//! use keyward_license::{AccessDecision, LicenseClient, LicensingConfig};
//!
//! # async fn run() -> keyward_license::LicenseResult<()> {
//! let config = LicensingConfig::from_env()?;
//! keyward_license::logging::init(&config);
//!
//! let client = LicenseClient::new(config)?;
//! if !client.is_valid(None) {
//!     client.activate(None).await?;
//! }
//! match client.check_access(None).await {
//!     AccessDecision::Allowed { .. } => {}
//!     AccessDecision::Denied => eprintln!("license required"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod clock;
mod client;
pub mod config;
pub mod device;
mod error;
pub mod logging;
pub mod store;
pub mod token;

pub use api::LicensingApi;
#[cfg(feature = "online")]
pub use api::HttpLicensingApi;
pub use client::{
    AccessDecision, AccessReason, LicenseClient, LicenseClientBuilder, LicenseState, Outcome,
    EXPIRY_WARNING_DAYS,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{CacheConfig, HeartbeatConfig, LicensingConfig};
pub use device::{DeviceFingerprint, DeviceMetadata, FingerprintGenerator, HostProbe};
pub use error::{LicenseError, LicenseResult};
pub use store::{GracePeriodRecord, TokenStore};
pub use token::{LicenseClaims, LicenseInfo, TokenValidator};
