//! Structured logging with tracing
//!
//! Logs go to stderr so that stdout only carries rendered output.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter (e.g. `gametrics=debug`)
pub const LOG_ENV: &str = "GAMETRICS_LOG";

/// Level used when `GAMETRICS_LOG` is unset or invalid
const DEFAULT_FILTER: &str = "warn";

/// Initialize the global subscriber; later calls are ignored
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}
