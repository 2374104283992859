//! Encrypted session file.
//!
//! On disk the file is one [`EncryptedBlob`](crate::cipher::EncryptedBlob).
//! Its plaintext is a small JSON envelope carrying a format version, the
//! principal it belongs to, and the bridge-issued credential payload.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::cipher;
use crate::error::SessionError;
use crate::fsutil;
use crate::secret::SecretKey;

pub const SESSION_FILE_NAME: &str = "session.json.enc";
pub const SESSION_FORMAT_VERSION: u32 = 1;

const SESSION_AAD: &[u8] = b"drive-session-v1";

/// Opaque credential payload issued by the drive bridge.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionRecord(Zeroizing<Vec<u8>>);

impl SessionRecord {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialize a bridge credential struct into a record.
    pub fn to_json<T: Serialize>(value: &T) -> Result<Self, SessionError> {
        Ok(Self::from_bytes(serde_json::to_vec(value)?))
    }

    pub fn from_json<T: DeserializeOwned>(&self) -> Result<T, SessionError> {
        Ok(serde_json::from_slice(&self.0)?)
    }
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionRecord([REDACTED; {} bytes])", self.0.len())
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    format_version: u32,
    principal: String,
    saved_at: DateTime<Utc>,
    payload: String,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn save_session(
        &self,
        principal: &str,
        record: &SessionRecord,
        key: &SecretKey,
    ) -> Result<(), SessionError> {
        let envelope = Envelope {
            format_version: SESSION_FORMAT_VERSION,
            principal: principal.to_string(),
            saved_at: Utc::now(),
            payload: general_purpose::STANDARD.encode(record.as_bytes()),
        };
        let plaintext = Zeroizing::new(serde_json::to_vec(&envelope)?);
        let _encoded_payload = Zeroizing::new(envelope.payload);

        let blob = cipher::encrypt_with_aad(&plaintext, key.as_ref(), SESSION_AAD)?;
        if let Some(dir) = self.path.parent() {
            fsutil::create_private_dir(dir)?;
        }
        fsutil::write_private_atomic(&self.path, blob.as_bytes())?;
        info!(principal, path = %self.path.display(), "session saved");
        Ok(())
    }

    /// Returns the principal the session was saved for and its record.
    pub fn load_session(&self, key: &SecretKey) -> Result<(String, SessionRecord), SessionError> {
        let blob = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(SessionError::NotFound),
            Err(e) => return Err(e.into()),
        };
        let plaintext = cipher::decrypt_with_aad(&blob, key.as_ref(), SESSION_AAD)?;
        let envelope: Envelope = serde_json::from_slice(&plaintext)
            .map_err(|e| SessionError::Malformed(e.to_string()))?;
        let encoded = Zeroizing::new(envelope.payload);

        if envelope.format_version != SESSION_FORMAT_VERSION {
            return Err(SessionError::UnsupportedFormat(envelope.format_version));
        }
        let payload = general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| SessionError::Malformed(e.to_string()))?;

        debug!(principal = %envelope.principal, saved_at = %envelope.saved_at, "session loaded");
        Ok((envelope.principal, SessionRecord::from_bytes(payload)))
    }

    /// Securely remove the session file. A missing file is not an error.
    pub fn clear_session(&self) -> Result<(), SessionError> {
        fsutil::secure_remove(&self.path)?;
        info!(path = %self.path.display(), "session cleared");
        Ok(())
    }
}
