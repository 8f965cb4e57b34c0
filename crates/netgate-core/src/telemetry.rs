//! Tracing subscriber setup for netgate binaries.
//!
//! [`init_tracing`] installs a global subscriber once; later calls are
//! ignored. `RUST_LOG` takes precedence over the level passed in.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// `json` switches to newline-delimited JSON, which is how lifecycle events
/// from [`crate::obs`] are meant to be shipped as an audit trail.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    // Logs go to stderr so stdout stays free for command output.
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

/// Parse a `LOG_LEVEL` style string, falling back to `INFO`.
pub fn parse_level(raw: Option<&str>) -> Level {
    raw.and_then(|s| s.trim().parse::<Level>().ok())
        .unwrap_or(Level::INFO)
}
