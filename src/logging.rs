//! Tracing setup
//!
//! The library only emits `tracing` events; installing a subscriber is the
//! caller's choice. [`init_tracing`] is the stock setup: `RUST_LOG` wins,
//! otherwise `default_directive` (e.g. `"info"` or `"drp_eval=debug"`).

use tracing_subscriber::EnvFilter;

use crate::{Error, Result};

/// Install a global fmt subscriber filtered by `RUST_LOG` or `default_directive`.
///
/// # Errors
///
/// Returns [`Error::Configuration`] for an unparsable directive and
/// [`Error::Other`] if a global subscriber is already installed.
pub fn init_tracing(default_directive: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive).map_err(|e| {
            Error::Configuration(format!("invalid log directive '{default_directive}': {e}"))
        })?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| Error::Other(format!("tracing subscriber already installed: {e}")))
}
