//! File system paths.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Name of the per-user directory under the home directory.
const BASE_DIR_NAME: &str = ".encore";
/// Central structured log file name.
const LOG_FILE_NAME: &str = "encore.jsonl";

/// Manages file system paths.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for runtime files (~/.encore)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.encore`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.encore).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.encore/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the logs directory (~/.encore/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the central log file path (~/.encore/logs/encore.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join(LOG_FILE_NAME)
    }

    /// Get the credentials directory used by the file storage backend
    /// (~/.encore/credentials).
    pub fn credentials_dir(&self) -> PathBuf {
        self.base_dir.join("credentials")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
