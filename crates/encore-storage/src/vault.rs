//! Durable codec for the session record.
//!
//! A record is two entries under the same service: the session key and the
//! display name. A failed write leaves the previous record in place, or no
//! record at all; a half-present record on read is reported as corrupt.

use crate::{SecureStorage, StorageError, StorageKeys, StorageResult};
use std::fmt;
use tracing::{debug, warn};

/// The durable form of a session.
#[derive(Clone, PartialEq, Eq)]
pub struct PersistedSessionRecord {
    pub session_key: String,
    pub display_name: String,
}

impl fmt::Debug for PersistedSessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedSessionRecord")
            .field("session_key", &"[REDACTED]")
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// Reads and writes [`PersistedSessionRecord`]s through a storage backend.
pub struct SessionVault {
    storage: Box<dyn SecureStorage>,
}

impl SessionVault {
    pub fn new(storage: Box<dyn SecureStorage>) -> Self {
        Self { storage }
    }

    /// Name of the backend in use.
    pub fn backend_name(&self) -> &'static str {
        self.storage.backend_name()
    }

    /// Write both entries. If the second write fails the first is rolled back
    /// to the record stored before.
    pub fn store_record(&self, record: &PersistedSessionRecord) -> StorageResult<()> {
        // A corrupt or unreadable previous record is not worth restoring.
        let previous = self.load_record().ok().flatten();

        self.storage
            .set(StorageKeys::SESSION_KEY, &record.session_key)?;

        if let Err(e) = self
            .storage
            .set(StorageKeys::DISPLAY_NAME, &record.display_name)
        {
            warn!(error = %e, "display name write failed, rolling back session record");
            self.roll_back(previous.as_ref());
            return Err(e);
        }

        debug!(backend = self.backend_name(), "session record stored");
        Ok(())
    }

    /// Put the previous session key back (its display name was never
    /// replaced), or remove everything so the store reads as empty.
    fn roll_back(&self, previous: Option<&PersistedSessionRecord>) {
        if let Some(previous) = previous {
            match self
                .storage
                .set(StorageKeys::SESSION_KEY, &previous.session_key)
            {
                Ok(()) => return,
                Err(e) => warn!(error = %e, "could not restore previous session key"),
            }
        }
        if let Err(e) = self.delete_record() {
            warn!(error = %e, "rollback of session record failed");
        }
    }

    /// Read the record. `None` when nothing is stored.
    pub fn load_record(&self) -> StorageResult<Option<PersistedSessionRecord>> {
        let session_key = self.storage.get(StorageKeys::SESSION_KEY)?;
        let display_name = self.storage.get(StorageKeys::DISPLAY_NAME)?;

        match (session_key, display_name) {
            (None, None) => Ok(None),
            (Some(session_key), Some(display_name)) => {
                if session_key.is_empty() {
                    return Err(StorageError::CorruptRecord(
                        "stored session key is empty".to_string(),
                    ));
                }
                Ok(Some(PersistedSessionRecord {
                    session_key,
                    display_name,
                }))
            }
            (Some(_), None) => Err(StorageError::CorruptRecord(
                "display name entry is missing".to_string(),
            )),
            (None, Some(_)) => Err(StorageError::CorruptRecord(
                "session key entry is missing".to_string(),
            )),
        }
    }

    /// Delete both entries. Returns whether anything was removed.
    ///
    /// Every entry is attempted even if an earlier delete fails; the first
    /// error is returned.
    pub fn delete_record(&self) -> StorageResult<bool> {
        let mut removed = false;
        let mut first_error = None;

        for key in StorageKeys::SESSION_RECORD {
            match self.storage.delete(key) {
                Ok(existed) => removed |= existed,
                Err(e) => {
                    warn!(key = %key, error = %e, "failed to delete session record entry");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }
}
