//! Encrypted owner-only file backend.
//!
//! Layout under the credentials directory (0700):
//!
//! ```text
//! master.key          base64 of 32 random bytes (0600)
//! <key>.enc           base64 of nonce || ChaCha20-Poly1305 ciphertext (0600)
//! ```
//!
//! The encryption key is derived from the master key with HKDF-SHA256, so the
//! master key itself never touches a cipher.

use crate::{SecureStorage, StorageError, StorageResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const MASTER_KEY_FILE: &str = "master.key";
const RECORD_EXTENSION: &str = "enc";
const HKDF_INFO: &[u8] = b"encore-credentials-v1";
const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

/// File-based storage for hosts without a reachable OS credential store.
pub struct EncryptedFileStorage {
    dir: PathBuf,
}

impl EncryptedFileStorage {
    /// Open (creating if needed) the credentials directory.
    pub fn new(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        create_private_dir(&dir)?;
        Ok(Self { dir })
    }

    /// Directory the records live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> StorageResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::BackendUnavailable(format!(
                "unsupported storage key name: {key}"
            )));
        }
        Ok(self.dir.join(format!("{key}.{RECORD_EXTENSION}")))
    }

    fn cipher(&self) -> StorageResult<ChaCha20Poly1305> {
        let master = self.load_or_create_master_key()?;
        let hkdf = Hkdf::<Sha256>::new(None, &master);
        let mut okm = [0u8; KEY_SIZE];
        hkdf.expand(HKDF_INFO, &mut okm)
            .map_err(|e| StorageError::BackendUnavailable(format!("HKDF expand failed: {e}")))?;
        ChaCha20Poly1305::new_from_slice(&okm)
            .map_err(|e| StorageError::BackendUnavailable(format!("cipher init failed: {e}")))
    }

    fn load_or_create_master_key(&self) -> StorageResult<Vec<u8>> {
        let path = self.dir.join(MASTER_KEY_FILE);
        match fs::read_to_string(&path) {
            Ok(encoded) => {
                let key = BASE64
                    .decode(encoded.trim())
                    .map_err(|_| StorageError::CorruptRecord("master key is not base64".into()))?;
                if key.len() != KEY_SIZE {
                    return Err(StorageError::CorruptRecord(format!(
                        "master key has {} bytes, expected {KEY_SIZE}",
                        key.len()
                    )));
                }
                Ok(key)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let mut key = vec![0u8; KEY_SIZE];
                rand::thread_rng().fill_bytes(&mut key);
                write_private_file(&path, BASE64.encode(&key).as_bytes())?;
                debug!(dir = %self.dir.display(), "created credentials master key");
                Ok(key)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl SecureStorage for EncryptedFileStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        debug!(dir = %self.dir.display(), key = %key, "Writing encrypted record");
        let path = self.record_path(key)?;
        let cipher = self.cipher()?;

        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), value.as_bytes())
            .map_err(|e| StorageError::BackendUnavailable(format!("encryption failed: {e}")))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        write_private_file(&path, BASE64.encode(blob).as_bytes())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        debug!(dir = %self.dir.display(), key = %key, "Reading encrypted record");
        let path = self.record_path(key)?;
        let encoded = match fs::read_to_string(&path) {
            Ok(encoded) => encoded,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let blob = BASE64
            .decode(encoded.trim())
            .map_err(|_| StorageError::CorruptRecord(format!("{key} is not base64")))?;
        if blob.len() <= NONCE_SIZE {
            return Err(StorageError::CorruptRecord(format!("{key} is truncated")));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);

        let plaintext = self
            .cipher()?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| StorageError::CorruptRecord(format!("{key} failed to decrypt")))?;

        String::from_utf8(plaintext)
            .map(Some)
            .map_err(|_| StorageError::CorruptRecord(format!("{key} is not UTF-8")))
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        debug!(dir = %self.dir.display(), key = %key, "Deleting encrypted record");
        let path = self.record_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn backend_name(&self) -> &'static str {
        "encrypted-file"
    }
}

fn create_private_dir(dir: &Path) -> StorageResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dir)?;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }

    #[cfg(not(unix))]
    {
        fs::create_dir_all(dir)?;
    }

    Ok(())
}

/// Write via a temp file and rename so a crash never leaves half a record.
fn write_private_file(path: &Path, contents: &[u8]) -> StorageResult<()> {
    let tmp = path.with_extension("tmp");

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
    }

    fs::rename(&tmp, path)?;
    Ok(())
}
