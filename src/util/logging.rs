//! Structured logging setup.
//!
//! Logs go to stderr through `tracing`; stdout stays reserved for command
//! output. `RUST_LOG` takes priority over the configured level.

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Ensures logging is only initialized once
static INIT: Once = Once::new();

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level for this crate's events
    pub level: Level,

    /// Emit one JSON object per event instead of human-readable lines
    pub use_json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            use_json: false,
        }
    }
}

impl LoggingConfig {
    /// Map a `-v` count to a level: none → warn, 1 → info, 2 → debug, 3+ → trace.
    pub fn from_verbosity(verbose: u8, use_json: bool) -> Self {
        let level = match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };
        Self { level, use_json }
    }

    /// Filter directive applied when `RUST_LOG` is unset.
    pub fn directive(&self) -> String {
        format!("ccm_infra={}", self.level.as_str().to_lowercase())
    }
}

/// Initializes the logging system. Subsequent calls are ignored.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut filter = EnvFilter::from_default_env();

        if env::var("RUST_LOG").is_err() {
            match config.directive().parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(e) => eprintln!("invalid log directive '{}': {}", config.directive(), e),
            }
        }

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sc016_verbosity_levels() {
        assert_eq!(LoggingConfig::from_verbosity(0, false).level, Level::WARN);
        assert_eq!(LoggingConfig::from_verbosity(1, false).level, Level::INFO);
        assert_eq!(LoggingConfig::from_verbosity(2, false).level, Level::DEBUG);
        assert_eq!(LoggingConfig::from_verbosity(7, true).level, Level::TRACE);
        assert!(LoggingConfig::from_verbosity(0, true).use_json);
    }

    #[test]
    fn test_sc016_directive() {
        let config = LoggingConfig::from_verbosity(2, false);
        assert_eq!(config.directive(), "ccm_infra=debug");
        assert!(config.directive().parse::<tracing_subscriber::filter::Directive>().is_ok());
    }

    #[test]
    fn test_sc016_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, Level::WARN);
        assert!(!config.use_json);
    }
}
