//! Secure storage for the Encore session record.
//!
//! Backends:
//! - **macOS**: Keychain Access via `security-framework`
//! - **Linux**: Secret Service (GNOME Keyring / KWallet) via `secret-service`
//! - **Windows**: Credential Vault via `windows` crate
//! - **Fallback**: ChaCha20-Poly1305 encrypted owner-only files
//! - **Memory**: volatile, for ephemeral runs and tests
//!
//! [`create_storage`] picks one at startup from the configured preference and
//! what the host actually offers.

mod file;
mod keys;
mod memory;
mod traits;
mod vault;

#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "windows")]
mod windows;

pub use encore_config_and_utils::StorageBackendPreference;
pub use file::EncryptedFileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use traits::SecureStorage;
pub use vault::{PersistedSessionRecord, SessionVault};

use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Service name used for all OS credential store entries.
pub const SERVICE_NAME: &str = "fm.encore.session";

/// Error type for storage operations.
///
/// Messages describe what failed, never the stored values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No usable backend, or the backend failed at the transport level.
    #[error("storage backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A stored record exists but cannot be decoded.
    #[error("stored session record is corrupt: {0}")]
    CorruptRecord(String),

    /// The backend refused access.
    #[error("storage permission denied: {0}")]
    PermissionDenied(String),
}

/// Machine-readable storage error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageErrorKind {
    BackendUnavailable,
    CorruptRecord,
    PermissionDenied,
}

impl StorageError {
    pub fn kind(&self) -> StorageErrorKind {
        match self {
            Self::BackendUnavailable(_) => StorageErrorKind::BackendUnavailable,
            Self::CorruptRecord(_) => StorageErrorKind::CorruptRecord,
            Self::PermissionDenied(_) => StorageErrorKind::PermissionDenied,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(e.to_string()),
            _ => Self::BackendUnavailable(e.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Create the platform credential store backend, if the host has one.
pub fn create_os_storage() -> StorageResult<Box<dyn SecureStorage>> {
    #[cfg(target_os = "macos")]
    {
        let storage = macos::KeychainStorage::new(SERVICE_NAME)?;
        Ok(Box::new(storage))
    }

    #[cfg(target_os = "linux")]
    {
        let storage = linux::SecretServiceStorage::new(SERVICE_NAME)?;
        Ok(Box::new(storage))
    }

    #[cfg(target_os = "windows")]
    {
        let storage = windows::CredentialStorage::new(SERVICE_NAME)?;
        Ok(Box::new(storage))
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        Err(StorageError::BackendUnavailable(
            "No secure storage implementation available for this platform".to_string(),
        ))
    }
}

/// Select a storage backend.
///
/// `credentials_dir` is only touched when the encrypted-file backend is chosen.
pub fn create_storage(
    preference: StorageBackendPreference,
    credentials_dir: &Path,
) -> StorageResult<Box<dyn SecureStorage>> {
    let storage: Box<dyn SecureStorage> = match preference {
        StorageBackendPreference::Memory => Box::new(MemoryStorage::new()),
        StorageBackendPreference::File => Box::new(EncryptedFileStorage::new(credentials_dir)?),
        StorageBackendPreference::Os => create_os_storage()?,
        StorageBackendPreference::Auto => match create_os_storage() {
            Ok(storage) => storage,
            Err(e) => {
                warn!(error = %e, "OS credential store unavailable, using encrypted file storage");
                Box::new(EncryptedFileStorage::new(credentials_dir)?)
            }
        },
    };

    info!(
        preference = %preference,
        backend = storage.backend_name(),
        "storage backend selected"
    );
    Ok(storage)
}

/// Create a [`SessionVault`] over the selected backend.
pub fn create_session_vault(
    preference: StorageBackendPreference,
    credentials_dir: &Path,
) -> StorageResult<SessionVault> {
    Ok(SessionVault::new(create_storage(preference, credentials_dir)?))
}
