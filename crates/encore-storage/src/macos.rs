//! macOS Keychain implementation.

use crate::{SecureStorage, StorageError, StorageResult};
use security_framework::base::Error as SecurityError;
use security_framework::item::{ItemClass, ItemSearchOptions, Limit, SearchResult};
use security_framework::passwords::{delete_generic_password, set_generic_password};
use tracing::debug;

const ERR_SEC_ITEM_NOT_FOUND: i32 = -25300;
const ERR_SEC_AUTH_FAILED: i32 = -25293;
const ERR_SEC_INTERACTION_NOT_ALLOWED: i32 = -25308;
const ERR_USER_CANCELED: i32 = -128;

/// Keychain-based secure storage for macOS.
pub struct KeychainStorage {
    service_name: String,
}

impl KeychainStorage {
    /// Create a Keychain storage instance, probing that the keychain answers.
    pub fn new(service_name: &str) -> StorageResult<Self> {
        let storage = Self {
            service_name: service_name.to_string(),
        };
        storage.search("__encore_probe__")?;
        Ok(storage)
    }

    fn search(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let mut search = ItemSearchOptions::new();
        search
            .class(ItemClass::generic_password())
            .service(&self.service_name)
            .account(key)
            .limit(Limit::Max(1))
            .load_data(true);

        match search.search() {
            Ok(results) => match results.into_iter().next() {
                Some(SearchResult::Data(data)) => Ok(Some(data)),
                _ => Ok(None),
            },
            Err(e) if e.code() == ERR_SEC_ITEM_NOT_FOUND => Ok(None),
            Err(e) => Err(map_error("read keychain item", e)),
        }
    }
}

fn map_error(action: &str, e: SecurityError) -> StorageError {
    match e.code() {
        ERR_SEC_AUTH_FAILED | ERR_SEC_INTERACTION_NOT_ALLOWED | ERR_USER_CANCELED => {
            StorageError::PermissionDenied(format!("failed to {action}: {e}"))
        }
        _ => StorageError::BackendUnavailable(format!("failed to {action}: {e}")),
    }
}

impl SecureStorage for KeychainStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        debug!(service = %self.service_name, key = %key, "Setting keychain item");

        // Replace rather than update so attributes never go stale.
        let _ = delete_generic_password(&self.service_name, key);

        set_generic_password(&self.service_name, key, value.as_bytes())
            .map_err(|e| map_error("set keychain item", e))
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        debug!(service = %self.service_name, key = %key, "Getting keychain item");
        match self.search(key)? {
            Some(data) => String::from_utf8(data)
                .map(Some)
                .map_err(|_| StorageError::CorruptRecord(format!("{key} is not UTF-8"))),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        debug!(service = %self.service_name, key = %key, "Deleting keychain item");

        match delete_generic_password(&self.service_name, key) {
            Ok(()) => Ok(true),
            Err(e) if e.code() == ERR_SEC_ITEM_NOT_FOUND => Ok(false),
            Err(e) => Err(map_error("delete keychain item", e)),
        }
    }

    fn backend_name(&self) -> &'static str {
        "keychain"
    }
}
