//! Global `tracing` subscriber setup.
//!
//! Level priority:
//! 1. `SYNCFLOW_LOG` environment variable (full `EnvFilter` directives)
//! 2. the configured level
//! 3. `info`
//!
//! Logs go to stderr.

use crate::config::LogConfig;
use crate::errors::SyncflowError;
use tracing_subscriber::EnvFilter;

/// Environment variable holding filter directives.
pub const LOG_ENV_VAR: &str = "SYNCFLOW_LOG";

/// Installs the global subscriber.
///
/// Fails instead of panicking when a subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> Result<(), SyncflowError> {
    let fallback = parse_level(&config.level).unwrap_or(tracing::Level::INFO);
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(fallback.to_string().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| SyncflowError::Settings(format!("tracing already initialised: {e}")))
}

/// Parses a level name such as `"warn"` or `"DEBUG"`.
#[must_use]
pub fn parse_level(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("WARNING"), Some(tracing::Level::WARN));
        assert_eq!(parse_level(" debug "), Some(tracing::Level::DEBUG));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn test_second_init_is_an_error() {
        let config = LogConfig::default();
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
