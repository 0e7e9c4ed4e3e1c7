//! Storage trait definitions.

use crate::StorageResult;

/// Trait for secure storage backends.
///
/// Implementations are blocking; async callers move them onto a blocking
/// thread.
pub trait SecureStorage: Send + Sync {
    /// Store a value securely, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve a value
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Delete a value. Returns whether something was removed.
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Short backend name for logs and status output.
    fn backend_name(&self) -> &'static str;
}
