//! # Observability
//!
//! Centralized logging layer for Encore.
//!
//! ## Design Philosophy
//!
//! Components are **log producers**. The host calls
//! `observability::init_with_config()` once at startup; everything else uses
//! plain `tracing` macros and knows nothing about where logs go.
//!
//! ## Dev Mode
//!
//! Every process writes structured JSONL to one central file:
//! `~/.encore/logs/encore.jsonl`
//!
//! - `tail -f ~/.encore/logs/encore.jsonl | jq` for pretty JSON
//! - `lnav ~/.encore/logs/encore.jsonl` for interactive exploration
//!
//! Values under credential-like field names (`session_key`, `token`,
//! `api_sig`, `secret`, ...) are replaced with `[REDACTED]` before a line is
//! written.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "encore".into(),
//!         default_level: "debug".into(),
//!         also_stderr: true,
//!         ..Default::default()
//!     });
//!     tracing::info!("ready");
//! }
//! ```

#[cfg(feature = "dev")]
mod dev;

mod json_layer;
mod redact;

use std::path::PathBuf;

pub use redact::{is_sensitive_key, redact_value, REDACTED};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service (e.g., "encore", "encore-test").
    /// Included in every log line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional custom log file path.
    /// Defaults to `~/.encore/logs/encore.jsonl` in dev mode.
    pub log_path: Option<PathBuf>,

    /// Also emit logs to stderr for immediate feedback.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize the observability layer with custom configuration.
///
/// Calling this more than once is harmless: later calls leave the first
/// subscriber in place.
pub fn init_with_config(config: LogConfig) {
    #[cfg(feature = "dev")]
    {
        dev::init_dev_subscriber(&config);
    }

    #[cfg(not(feature = "dev"))]
    {
        use tracing_subscriber::util::SubscriberInitExt;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.default_level)),
            )
            .with_target(true)
            .compact()
            .finish()
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);
    }
}
