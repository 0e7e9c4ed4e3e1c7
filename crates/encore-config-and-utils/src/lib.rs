//! Core types, configuration, and utilities shared by the Encore crates.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, StorageBackendPreference, DEFAULT_API_KEY, DEFAULT_API_ROOT, DEFAULT_AUTH_TIMEOUT_SECS,
    DEFAULT_AUTH_URL, DEFAULT_CALLBACK_PORT, DEFAULT_LOG_LEVEL, DEFAULT_SHARED_SECRET,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
