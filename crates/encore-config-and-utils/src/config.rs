//! Configuration management.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use url::Url;

/// Default API key (can be baked in at compile time via ENCORE_API_KEY).
pub const DEFAULT_API_KEY: &str = match option_env!("ENCORE_API_KEY") {
    Some(key) => key,
    None => "",
};

/// Default shared secret (can be baked in at compile time via ENCORE_SHARED_SECRET).
pub const DEFAULT_SHARED_SECRET: &str = match option_env!("ENCORE_SHARED_SECRET") {
    Some(secret) => secret,
    None => "",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Browser authorization endpoint.
pub const DEFAULT_AUTH_URL: &str = "https://www.last.fm/api/auth/";

/// Web service root used for the token exchange and validation calls.
pub const DEFAULT_API_ROOT: &str = "https://ws.audioscrobbler.com/2.0/";

/// Local port the callback listener binds to.
pub const DEFAULT_CALLBACK_PORT: u16 = 5555;

/// How long an interactive login waits for the browser redirect.
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 300;

/// Which durable storage backend to use for the session record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendPreference {
    /// OS credential store when reachable, encrypted file otherwise.
    #[default]
    Auto,
    /// OS credential store only.
    Os,
    /// Encrypted owner-only file.
    File,
    /// Process memory; nothing survives a restart.
    Memory,
}

impl FromStr for StorageBackendPreference {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "os" | "keychain" => Ok(Self::Os),
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(CoreError::Config(format!(
                "unknown storage backend '{other}' (expected auto, os, file or memory)"
            ))),
        }
    }
}

impl fmt::Display for StorageBackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Os => "os",
            Self::File => "file",
            Self::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// Main configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Application API key sent with every remote call.
    #[serde(default = "default_api_key")]
    pub api_key: String,
    /// Shared secret used for request signing. Never written back to disk.
    #[serde(default = "default_shared_secret", skip_serializing)]
    pub shared_secret: String,
    /// Browser authorization endpoint.
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    /// Web service root.
    #[serde(default = "default_api_root")]
    pub api_root: String,
    /// Local callback port.
    #[serde(default = "default_callback_port")]
    pub callback_port: u16,
    /// Interactive login deadline, in seconds.
    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,
    /// Launch the system browser during login.
    #[serde(default = "default_true")]
    pub open_browser: bool,
    /// Reject callbacks whose `state` does not match.
    #[serde(default)]
    pub strict_state: bool,
    /// Durable storage selection.
    #[serde(default)]
    pub storage_backend: StorageBackendPreference,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_key() -> String {
    DEFAULT_API_KEY.to_string()
}

fn default_shared_secret() -> String {
    DEFAULT_SHARED_SECRET.to_string()
}

fn default_auth_url() -> String {
    DEFAULT_AUTH_URL.to_string()
}

fn default_api_root() -> String {
    DEFAULT_API_ROOT.to_string()
}

fn default_callback_port() -> u16 {
    DEFAULT_CALLBACK_PORT
}

fn default_auth_timeout_secs() -> u64 {
    DEFAULT_AUTH_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_key: default_api_key(),
            shared_secret: default_shared_secret(),
            auth_url: default_auth_url(),
            api_root: default_api_root(),
            callback_port: DEFAULT_CALLBACK_PORT,
            auth_timeout_secs: DEFAULT_AUTH_TIMEOUT_SECS,
            open_browser: true,
            strict_state: false,
            storage_backend: StorageBackendPreference::Auto,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("log_level", &self.log_level)
            .field("api_key_set", &!self.api_key.is_empty())
            .field("shared_secret_set", &!self.shared_secret.is_empty())
            .field("auth_url", &self.auth_url)
            .field("api_root", &self.api_root)
            .field("callback_port", &self.callback_port)
            .field("auth_timeout_secs", &self.auth_timeout_secs)
            .field("open_browser", &self.open_browser)
            .field("strict_state", &self.strict_state)
            .field("storage_backend", &self.storage_backend)
            .finish()
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file (if any), then apply
    /// environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file. The shared secret is never written.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let config_path = paths.config_file();
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_env(|name| std::env::var(name).ok());
    }

    /// Apply overrides from a variable lookup. Unparseable values are
    /// ignored with a warning.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        if let Some(value) = get("ENCORE_LOG_LEVEL") {
            self.log_level = value;
        }
        if let Some(value) = get("ENCORE_API_KEY") {
            self.api_key = value;
        }
        if let Some(value) = get("ENCORE_SHARED_SECRET") {
            self.shared_secret = value;
        }
        if let Some(value) = get("ENCORE_AUTH_URL") {
            self.auth_url = value;
        }
        if let Some(value) = get("ENCORE_API_ROOT") {
            self.api_root = value;
        }
        if let Some(value) = get("ENCORE_CALLBACK_PORT") {
            match value.parse() {
                Ok(port) => self.callback_port = port,
                Err(_) => tracing::warn!(value = %value, "ignoring invalid ENCORE_CALLBACK_PORT"),
            }
        }
        if let Some(value) = get("ENCORE_AUTH_TIMEOUT_SECS") {
            match value.parse() {
                Ok(secs) => self.auth_timeout_secs = secs,
                Err(_) => {
                    tracing::warn!(value = %value, "ignoring invalid ENCORE_AUTH_TIMEOUT_SECS")
                }
            }
        }
        if let Some(value) = get("ENCORE_OPEN_BROWSER") {
            match parse_bool(&value) {
                Some(flag) => self.open_browser = flag,
                None => tracing::warn!(value = %value, "ignoring invalid ENCORE_OPEN_BROWSER"),
            }
        }
        if let Some(value) = get("ENCORE_STRICT_STATE") {
            match parse_bool(&value) {
                Some(flag) => self.strict_state = flag,
                None => tracing::warn!(value = %value, "ignoring invalid ENCORE_STRICT_STATE"),
            }
        }
        if let Some(value) = get("ENCORE_STORAGE_BACKEND") {
            match value.parse() {
                Ok(pref) => self.storage_backend = pref,
                Err(e) => tracing::warn!(error = %e, "ignoring ENCORE_STORAGE_BACKEND"),
            }
        }
    }

    /// Check that everything an authentication flow needs is present.
    pub fn validate_for_auth(&self) -> CoreResult<()> {
        if self.api_key.is_empty() {
            return Err(CoreError::Config(
                "API key is not set (ENCORE_API_KEY)".to_string(),
            ));
        }
        if self.shared_secret.is_empty() {
            return Err(CoreError::Config(
                "shared secret is not set (ENCORE_SHARED_SECRET)".to_string(),
            ));
        }
        if self.auth_timeout_secs == 0 {
            return Err(CoreError::Config(
                "auth_timeout_secs must be greater than zero".to_string(),
            ));
        }
        self.auth_url()?;
        self.api_root()?;
        Ok(())
    }

    /// Get the authorization endpoint as a parsed URL.
    pub fn auth_url(&self) -> CoreResult<Url> {
        Url::parse(&self.auth_url).map_err(CoreError::from)
    }

    /// Get the web service root as a parsed URL.
    pub fn api_root(&self) -> CoreResult<Url> {
        Url::parse(&self.api_root).map_err(CoreError::from)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
