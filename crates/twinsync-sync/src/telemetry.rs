//! tracing subscriber setup
//!
//! The level comes from [`LoggingConfig`] unless `RUST_LOG` is set.

use tracing::debug;
use tracing_subscriber::EnvFilter;

use twinsync_core::config::LoggingConfig;

/// Installs the global tracing subscriber
///
/// Calling it again once a subscriber is installed does nothing.
///
/// # Errors
/// Returns an error if the configured level is not a valid filter directive
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)?,
    };

    let installed = if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init()
    };

    if installed.is_err() {
        debug!("Tracing subscriber already installed");
    }
    Ok(())
}
