//! drive-core: secret and key lifecycle for the ProtonDrive Linux client
//!
//! # Design principles
//! - No custom crypto; PBKDF2 and XChaCha20-Poly1305 come from audited crates.
//! - Key and password buffers are zeroized on drop.
//! - Nothing user-facing ever carries raw error text; see [`safe_error`].
//!
//! # Module layout
//! - `secret`    : `SecretKey`, `Salt`, zeroizing buffers
//! - `kdf`       : PBKDF2-HMAC-SHA256 key derivation
//! - `cipher`    : AEAD blob encryption
//! - `cache`     : encrypted cache files with obfuscated names
//! - `escrow`    : OS keyring escrow with a no-persistence fallback
//! - `session`   : encrypted session file
//! - `principal` : login / restore / logout state machine
//! - `bridge`    : interface to the remote drive
//! - `records`   : SQLCipher-backed file metadata store
//! - `safe_error`: error classification and sanitizing
//! - `retry`     : backoff policy
//! - `config`    : explicit runtime configuration
//! - `error`     : per-module error enums

pub mod bridge;
pub mod cache;
pub mod cipher;
pub mod config;
pub mod error;
pub mod escrow;
pub mod fsutil;
pub mod kdf;
pub mod paths;
pub mod principal;
pub mod records;
pub mod retry;
pub mod safe_error;
pub mod secret;
pub mod session;

pub use bridge::{BridgeError, DriveBridge};
pub use cache::CacheStore;
pub use cipher::EncryptedBlob;
pub use config::CoreConfig;
pub use error::{ConfigError, CryptoError, EscrowError, SessionError, StoreError};
pub use escrow::{select_escrow, EscrowPreference, KeyEscrow, KeySlot};
pub use principal::{PrincipalState, SessionManager};
pub use records::{FileMetadataRecord, RecordStore, SyncStatus};
pub use retry::RetryPolicy;
pub use safe_error::{ErrorKind, SafeError};
pub use secret::{Salt, SecretBytes, SecretKey};
pub use session::{SessionRecord, SessionStore};
