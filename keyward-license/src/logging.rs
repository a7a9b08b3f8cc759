//! Tracing subscriber setup for hosts that have none of their own.

use crate::config::LicensingConfig;
use tracing_subscriber::EnvFilter;

/// Filter used when `debug` is set and `RUST_LOG` is not.
pub const DEBUG_FILTER: &str = "info,keyward_license=debug,keyward_crypto=debug";

/// Filter used otherwise.
pub const DEFAULT_FILTER: &str = "info";

/// Installs a global fmt subscriber. `RUST_LOG` wins over the configured
/// verbosity.
///
/// Returns false if a global subscriber was already installed, in which case
/// nothing changes.
pub fn init(config: &LicensingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if config.debug {
            DEBUG_FILTER
        } else {
            DEFAULT_FILTER
        })
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.debug)
        .try_init()
        .is_ok()
}
