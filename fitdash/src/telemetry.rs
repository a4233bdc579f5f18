//! Tracing subscriber setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter};

/// Logging options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub default_level: String,
    /// Emit one JSON object per event instead of human-readable lines.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Read `FITDASH_LOG_FORMAT` (`json` or anything else for text).
    pub fn from_env() -> Self {
        let json = std::env::var("FITDASH_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        Self {
            json,
            ..Self::default()
        }
    }
}

/// Install the global subscriber configured from the environment.
pub fn init() -> Result<(), TryInitError> {
    init_with(&TelemetryConfig::from_env())
}

/// Install the global subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init_with(config: &TelemetryConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.json {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().compact().with_target(true))
            .try_init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.default_level, "info");
        assert!(!config.json);
    }

    #[test]
    fn test_second_init_fails() {
        let config = TelemetryConfig::default();
        let _ = init_with(&config);
        assert!(init_with(&config).is_err());
    }
}
