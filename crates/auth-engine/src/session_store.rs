//! Concurrency-safe holder of the current session and its durable record.

use crate::Session;
use encore_storage::{PersistedSessionRecord, SessionVault, StorageResult};
use parking_lot::Mutex;
use tracing::{debug, info};

/// Single writer of the in-memory [`Session`] and its persisted record.
///
/// The in-memory slot and the durable backend have separate locks so a slow
/// keychain write never stalls `get()`. Durable operations are serialized
/// among themselves. Durable calls block; run them off the async executor.
pub struct SessionStore {
    current: Mutex<Option<Session>>,
    vault: SessionVault,
    durable: Mutex<()>,
}

impl SessionStore {
    pub fn new(vault: SessionVault) -> Self {
        Self {
            current: Mutex::new(None),
            vault,
            durable: Mutex::new(()),
        }
    }

    /// Snapshot of the current session.
    pub fn get(&self) -> Option<Session> {
        self.current.lock().clone()
    }

    /// Replace the in-memory session. Does not persist.
    pub fn set(&self, session: Session) {
        debug!(display_name = %session.display_name(), "session set");
        *self.current.lock() = Some(session);
    }

    /// Drop the in-memory session. Returns the previous one.
    pub fn clear(&self) -> Option<Session> {
        let previous = self.current.lock().take();
        if previous.is_some() {
            debug!("session cleared");
        }
        previous
    }

    /// Name of the durable backend.
    pub fn backend_name(&self) -> &'static str {
        self.vault.backend_name()
    }

    /// Write the durable record.
    pub fn persist(&self, session: &Session) -> StorageResult<()> {
        let _guard = self.durable.lock();
        self.vault
            .store_record(&PersistedSessionRecord::from(session))?;
        info!(backend = self.backend_name(), "session persisted");
        Ok(())
    }

    /// Read the durable record. `None` when nothing is stored.
    pub fn load_persisted(&self) -> StorageResult<Option<Session>> {
        let _guard = self.durable.lock();
        Ok(self.vault.load_record()?.map(Session::from))
    }

    /// Remove the durable record. Succeeds when nothing is stored.
    pub fn delete_persisted(&self) -> StorageResult<()> {
        let _guard = self.durable.lock();
        let removed = self.vault.delete_record()?;
        debug!(removed, "persisted session deleted");
        Ok(())
    }
}
