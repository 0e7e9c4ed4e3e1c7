//! Windows Credential Vault implementation.

use crate::{SecureStorage, StorageError, StorageResult};
use tracing::debug;
use windows::{
    core::HSTRING,
    Security::Credentials::{PasswordCredential, PasswordVault},
};

/// ERROR_NOT_FOUND as an HRESULT.
const HRESULT_NOT_FOUND: u32 = 0x8007_0490;
/// E_ACCESSDENIED.
const HRESULT_ACCESS_DENIED: u32 = 0x8007_0005;

/// Credential Vault based secure storage for Windows.
pub struct CredentialStorage {
    resource_name: String,
}

impl CredentialStorage {
    /// Create a new Credential Vault storage instance.
    pub fn new(service_name: &str) -> StorageResult<Self> {
        PasswordVault::new().map_err(|e| map_error("open credential vault", &e))?;

        Ok(Self {
            resource_name: service_name.to_string(),
        })
    }

    fn vault(&self) -> StorageResult<PasswordVault> {
        PasswordVault::new().map_err(|e| map_error("open credential vault", &e))
    }
}

fn hresult(e: &windows::core::Error) -> u32 {
    e.code().0 as u32
}

fn map_error(action: &str, e: &windows::core::Error) -> StorageError {
    if hresult(e) == HRESULT_ACCESS_DENIED {
        StorageError::PermissionDenied(format!("failed to {action}: {e}"))
    } else {
        StorageError::BackendUnavailable(format!("failed to {action}: {e}"))
    }
}

impl SecureStorage for CredentialStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        debug!(resource = %self.resource_name, key = %key, "Setting credential");

        let vault = self.vault()?;
        let _ = self.delete(key);

        let credential = PasswordCredential::CreatePasswordCredential(
            &HSTRING::from(&self.resource_name),
            &HSTRING::from(key),
            &HSTRING::from(value),
        )
        .map_err(|e| map_error("create credential", &e))?;

        vault
            .Add(&credential)
            .map_err(|e| map_error("add credential", &e))
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        debug!(resource = %self.resource_name, key = %key, "Getting credential");

        let vault = self.vault()?;
        match vault.Retrieve(&HSTRING::from(&self.resource_name), &HSTRING::from(key)) {
            Ok(credential) => {
                credential
                    .RetrievePassword()
                    .map_err(|e| map_error("retrieve password", &e))?;
                let password = credential
                    .Password()
                    .map_err(|e| map_error("read password", &e))?;
                Ok(Some(password.to_string()))
            }
            Err(e) if hresult(&e) == HRESULT_NOT_FOUND => Ok(None),
            Err(e) => Err(map_error("retrieve credential", &e)),
        }
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        debug!(resource = %self.resource_name, key = %key, "Deleting credential");

        let vault = self.vault()?;
        match vault.Retrieve(&HSTRING::from(&self.resource_name), &HSTRING::from(key)) {
            Ok(credential) => {
                vault
                    .Remove(&credential)
                    .map_err(|e| map_error("remove credential", &e))?;
                Ok(true)
            }
            Err(e) if hresult(&e) == HRESULT_NOT_FOUND => Ok(false),
            Err(e) => Err(map_error("find credential", &e)),
        }
    }

    fn backend_name(&self) -> &'static str {
        "credential-vault"
    }
}
