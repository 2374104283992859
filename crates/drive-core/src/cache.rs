//! Encrypted local cache files.
//!
//! A cached file is written as a single [`EncryptedBlob`](crate::cipher::EncryptedBlob) under the cache
//! directory, named `hex(sha256(original_path)) + ".enc"` so the directory
//! listing never reveals plaintext names.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::cipher;
use crate::error::CryptoError;
use crate::fsutil;
use crate::secret::{SecretBytes, KEY_SIZE};

pub const CACHE_SUFFIX: &str = ".enc";

#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Obfuscated cache location for `original`.
    pub fn cache_path_for(&self, original: &Path) -> PathBuf {
        let digest = Sha256::digest(original.to_string_lossy().as_bytes());
        self.dir
            .join(format!("{}{}", hex::encode(digest), CACHE_SUFFIX))
    }

    /// Encrypt the whole file at `path` into the cache and return the cache path.
    pub fn encrypt_cache_file(&self, path: &Path, key: &[u8]) -> Result<PathBuf, CryptoError> {
        check_key(key)?;
        let plaintext = SecretBytes::new(fs::read(path)?);
        let blob = cipher::encrypt(&plaintext, key)?;

        fsutil::create_private_dir(&self.dir)?;
        let target = self.cache_path_for(path);
        fsutil::write_private_atomic(&target, blob.as_bytes())?;
        debug!(cache = %target.display(), bytes = plaintext.len(), "cache file written");
        Ok(target)
    }

    pub fn decrypt_cache_file(&self, path: &Path, key: &[u8]) -> Result<SecretBytes, CryptoError> {
        check_key(key)?;
        let blob = fs::read(path)?;
        cipher::decrypt(&blob, key)
    }

    /// Zero-overwrite then remove. Missing files are not an error.
    pub fn delete_cache_file(&self, path: &Path) -> Result<(), CryptoError> {
        fsutil::secure_remove(path)?;
        debug!(cache = %path.display(), "cache file removed");
        Ok(())
    }

    /// Securely remove every cache file in the directory. Returns how many
    /// files were removed.
    pub fn purge(&self) -> Result<usize, CryptoError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            let is_cache_file = path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(CACHE_SUFFIX));
            if is_cache_file {
                fsutil::secure_remove(&path)?;
                removed += 1;
            }
        }
        info!(removed, dir = %self.dir.display(), "cache purged");
        Ok(removed)
    }
}

fn check_key(key: &[u8]) -> Result<(), CryptoError> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: key.len(),
        });
    }
    Ok(())
}
