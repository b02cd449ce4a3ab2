//! Log initialisation for hosts that want DSTC's configured verbosity.
//!
//! RUST_LOG, when set, wins over the config file — the usual development
//! override.

use dstc_core::config::DstcConfig;
use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber honoring `config.log_level`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init(config: &DstcConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
