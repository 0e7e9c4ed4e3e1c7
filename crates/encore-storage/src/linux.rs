//! Linux Secret Service implementation.

use crate::{SecureStorage, StorageError, StorageResult};
use secret_service::{blocking::SecretService, EncryptionType};
use std::collections::HashMap;
use tracing::debug;

/// Secret Service based secure storage for Linux (GNOME Keyring / KWallet).
pub struct SecretServiceStorage {
    service_name: String,
}

impl SecretServiceStorage {
    /// Create a new Secret Service storage instance.
    ///
    /// Fails with `BackendUnavailable` when no Secret Service answers on the
    /// session bus (headless hosts, containers).
    pub fn new(service_name: &str) -> StorageResult<Self> {
        SecretService::connect(EncryptionType::Dh).map_err(|e| map_error("connect", e))?;

        Ok(Self {
            service_name: service_name.to_string(),
        })
    }

    fn with_collection<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&secret_service::blocking::Collection) -> StorageResult<T>,
    {
        let ss = SecretService::connect(EncryptionType::Dh).map_err(|e| map_error("connect", e))?;

        let collection = ss
            .get_default_collection()
            .map_err(|e| map_error("open default collection", e))?;

        if collection.is_locked().unwrap_or(false) {
            collection
                .unlock()
                .map_err(|e| map_error("unlock collection", e))?;
        }

        f(&collection)
    }

    fn build_attributes<'a>(&'a self, key: &'a str) -> HashMap<&'a str, &'a str> {
        let mut attrs = HashMap::new();
        attrs.insert("service", self.service_name.as_str());
        attrs.insert("key", key);
        attrs
    }
}

fn map_error(action: &str, e: secret_service::Error) -> StorageError {
    match e {
        secret_service::Error::Locked | secret_service::Error::Prompt => {
            StorageError::PermissionDenied(format!("secret service refused to {action}: {e}"))
        }
        other => StorageError::BackendUnavailable(format!(
            "secret service failed to {action}: {other}"
        )),
    }
}

impl SecureStorage for SecretServiceStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        debug!(service = %self.service_name, key = %key, "Setting secret");

        self.with_collection(|collection| {
            let attrs = self.build_attributes(key);
            let label = format!("{}/{}", self.service_name, key);

            collection
                .create_item(&label, attrs, value.as_bytes(), true, "text/plain")
                .map_err(|e| map_error("store secret", e))?;

            Ok(())
        })
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        debug!(service = %self.service_name, key = %key, "Getting secret");

        self.with_collection(|collection| {
            let items = collection
                .search_items(self.build_attributes(key))
                .map_err(|e| map_error("search secrets", e))?;

            let Some(item) = items.first() else {
                return Ok(None);
            };

            let secret = item.get_secret().map_err(|e| map_error("read secret", e))?;

            String::from_utf8(secret)
                .map(Some)
                .map_err(|_| StorageError::CorruptRecord(format!("{key} is not UTF-8")))
        })
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        debug!(service = %self.service_name, key = %key, "Deleting secret");

        self.with_collection(|collection| {
            let items = collection
                .search_items(self.build_attributes(key))
                .map_err(|e| map_error("search secrets", e))?;

            if items.is_empty() {
                return Ok(false);
            }

            for item in &items {
                item.delete().map_err(|e| map_error("delete secret", e))?;
            }

            Ok(true)
        })
    }

    fn backend_name(&self) -> &'static str {
        "secret-service"
    }
}
