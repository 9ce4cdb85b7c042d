//! Shared tracing setup for mapper binaries.
//!
//! Log-file rotation and retention are explicitly out of scope for the
//! mapper core (spec.md §1 lists "log-file plumbing" as an external
//! collaborator) — this crate only wires `tracing` output to stderr with
//! an `EnvFilter`, the way a surrounding daemonization wrapper would then
//! redirect stderr into its own rotated files.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "mapper=info";

/// Logging configuration shared by mapper binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
    /// Quiet console output, for when an interactive console owns the
    /// terminal and file/forwarded logs carry the detail instead.
    pub quiet_console: bool,
}

/// Initialize tracing with a stderr writer driven by `RUST_LOG` or a
/// per-binary default filter.
pub fn init_logging(config: LogConfig<'_>) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if config.quiet_console && !config.verbose {
            EnvFilter::new("warn")
        } else if config.verbose {
            EnvFilter::new(format!("{}=debug", config.app_name))
        } else {
            EnvFilter::new(DEFAULT_LOG_FILTER)
        }
    });

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()?;

    tracing::debug!(app = config.app_name, "logging initialized");
    Ok(())
}
