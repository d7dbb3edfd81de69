// Structured logging for the encryption core.
// The library itself only emits `tracing` events (field paths, payload types,
// probe counts; never key material or plaintext). Binaries and tests call
// `init_logging` once to get formatted output.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging with default verbosity.
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() -> Result<()> {
    init_logging_with_level(false, false)
}

/// Initialize logging with configurable verbosity.
pub fn init_logging_with_level(verbose: bool, quiet: bool) -> Result<()> {
    let filter_level = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("fieldcrypt=trace,info")
    } else {
        EnvFilter::new("fieldcrypt=warn,error")
    };

    // Quiet wins over RUST_LOG; otherwise the environment may override.
    let env_filter = if quiet {
        EnvFilter::new("error")
    } else if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or(filter_level)
    } else {
        filter_level
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(!quiet)
        .with_ansi(true);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        Ok(()) => {
            if !quiet {
                info!("fieldcrypt logging initialized");
            }
            Ok(())
        }
        // Already initialized, which is fine in test environments.
        Err(_) => Ok(()),
    }
}
