//! Logging initialization.
//!
//! Every Encore process logs through the observability crate, which writes
//! structured JSONL to `~/.encore/logs/encore.jsonl`.

use std::path::PathBuf;

/// Initialize the logging system.
///
/// This sets up tracing with:
/// - Structured JSONL output to `~/.encore/logs/encore.jsonl`
///   (or `ENCORE_LOG_FILE` when set)
/// - Log level from RUST_LOG env var or the provided default
/// - Compact stderr output when `ENCORE_LOG_STDERR` is truthy
///
/// ```ignore
/// init_logging("info");
/// tracing::info!("encore started");
/// ```
pub fn init_logging(level: &str) {
    let log_path = std::env::var("ENCORE_LOG_FILE")
        .ok()
        .and_then(non_empty_env)
        .map(PathBuf::from);
    let also_stderr = std::env::var("ENCORE_LOG_STDERR")
        .ok()
        .and_then(non_empty_env)
        .map(|raw| matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false);

    observability::init_with_config(observability::LogConfig {
        service_name: "encore".into(),
        default_level: parse_level(level).to_string().to_ascii_lowercase(),
        log_path,
        also_stderr,
    });
}

fn non_empty_env(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
