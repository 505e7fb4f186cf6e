//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::RouterConfig;

/// Installs a global fmt subscriber filtered by `config.log_filter`.
///
/// `RUST_LOG` takes precedence over the configured filter when set.
///
/// # Errors
///
/// Returns an error if the filter directive is invalid or a global subscriber
/// is already installed.
pub fn init_tracing(config: &RouterConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_filter)?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
