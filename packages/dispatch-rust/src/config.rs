use std::time::Duration;

/// Routing-layer configuration.
///
/// Controls registration strictness, shutdown draining, and log output.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// When set, registering a second service at an existing path keeps the
    /// first registration instead of failing.
    pub allow_duplicate_paths: bool,
    /// Upper bound on how long `shutdown` waits for scheduled fan-outs.
    pub drain_timeout: Duration,
    /// `EnvFilter` directive used by `logging::init_tracing`.
    pub log_filter: String,
    /// Emit JSON log lines instead of human-readable text.
    pub log_json: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            allow_duplicate_paths: false,
            drain_timeout: Duration::from_secs(30),
            log_filter: "info".to_string(),
            log_json: false,
        }
    }
}
