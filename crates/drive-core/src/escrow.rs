//! Key escrow in an OS secret store.
//!
//! The backend is picked once at startup ([`select_escrow`]) and handed to
//! callers as `Arc<dyn KeyEscrow>`. Keys are stored hex-encoded under the
//! service [`KEYRING_SERVICE`] and an account of `"{principal}_{label}"`.
//!
//! A retrieved key is untrusted until something decrypts with it; use
//! [`retrieve_verified`] so a key that fails that check is purged.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use keyring::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::{CryptoError, EscrowError};
use crate::secret::SecretKey;

pub const KEYRING_SERVICE: &str = "protondrive-linux";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySlot {
    /// Encrypts the persisted session file.
    SessionKey,
    /// Data key of the encrypted metadata store.
    Credential,
}

impl KeySlot {
    pub fn label(self) -> &'static str {
        match self {
            KeySlot::SessionKey => "session_encryption_key",
            KeySlot::Credential => "credential_key",
        }
    }

    pub fn account(self, principal: &str) -> String {
        format!("{}_{}", principal, self.label())
    }
}

impl fmt::Display for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub trait KeyEscrow: Send + Sync {
    fn store(&self, principal: &str, slot: KeySlot, key: &SecretKey) -> Result<(), EscrowError>;

    fn retrieve(&self, principal: &str, slot: KeySlot) -> Result<SecretKey, EscrowError>;

    /// Removing an entry that does not exist succeeds.
    fn delete(&self, principal: &str, slot: KeySlot) -> Result<(), EscrowError>;

    fn is_available(&self) -> bool;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscrowPreference {
    /// Keyring when the session looks like it has one, otherwise no persistence.
    #[default]
    Auto,
    Keyring,
    Disabled,
}

/// Choose the escrow backend for this process.
pub fn select_escrow(preference: EscrowPreference) -> Arc<dyn KeyEscrow> {
    let escrow: Arc<dyn KeyEscrow> = match preference {
        EscrowPreference::Disabled => Arc::new(NoopEscrow),
        EscrowPreference::Keyring => Arc::new(KeyringEscrow::new()),
        EscrowPreference::Auto => {
            if keyring_probe() {
                Arc::new(KeyringEscrow::new())
            } else {
                warn!("no secret service detected; credentials will not be remembered");
                Arc::new(NoopEscrow)
            }
        }
    };
    info!(backend = escrow.name(), ?preference, "key escrow selected");
    escrow
}

/// Cheap check for a reachable desktop secret service.
pub fn keyring_probe() -> bool {
    #[cfg(target_os = "linux")]
    {
        let set = |name: &str| std::env::var_os(name).is_some_and(|v| !v.is_empty());
        set("XDG_CURRENT_DESKTOP") || set("DBUS_SESSION_BUS_ADDRESS")
    }
    #[cfg(not(target_os = "linux"))]
    {
        true
    }
}

/// Retrieve a key and prove it against `verify`. If `verify` reports an
/// authentication failure the entry is deleted and [`EscrowError::Stale`]
/// is returned. Other verification errors pass through untouched.
pub fn retrieve_verified<T, F>(
    escrow: &dyn KeyEscrow,
    principal: &str,
    slot: KeySlot,
    verify: F,
) -> Result<(SecretKey, T), EscrowError>
where
    F: FnOnce(&SecretKey) -> Result<T, CryptoError>,
{
    let key = escrow.retrieve(principal, slot)?;
    match verify(&key) {
        Ok(value) => Ok((key, value)),
        Err(CryptoError::Authentication) => {
            warn!(principal, %slot, "escrowed key failed verification; removing it");
            escrow.delete(principal, slot)?;
            Err(EscrowError::Stale {
                account: slot.account(principal),
            })
        }
        Err(other) => Err(EscrowError::Crypto(other)),
    }
}

/// Fetch the principal's metadata-store key, creating and escrowing a fresh
/// random one on first use. Independent of the password-derived session key.
pub fn load_or_create_data_key(
    escrow: &dyn KeyEscrow,
    principal: &str,
) -> Result<SecretKey, EscrowError> {
    match escrow.retrieve(principal, KeySlot::Credential) {
        Ok(key) => Ok(key),
        Err(EscrowError::NotFound { .. }) => {
            let key = SecretKey::generate();
            escrow.store(principal, KeySlot::Credential, &key)?;
            info!(principal, "generated new metadata data key");
            Ok(key)
        }
        Err(e) => Err(e),
    }
}

/// Desktop secret service via the `keyring` crate.
#[derive(Debug, Default)]
pub struct KeyringEscrow {
    _private: (),
}

impl KeyringEscrow {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, principal: &str, slot: KeySlot) -> Result<Entry, EscrowError> {
        Entry::new(KEYRING_SERVICE, &slot.account(principal))
            .map_err(|e| map_keyring_error(e, principal, slot))
    }
}

fn map_keyring_error(err: keyring::Error, principal: &str, slot: KeySlot) -> EscrowError {
    match err {
        keyring::Error::NoEntry => EscrowError::NotFound {
            account: slot.account(principal),
        },
        keyring::Error::NoStorageAccess(e) => EscrowError::AccessDenied(e.to_string()),
        keyring::Error::PlatformFailure(e) => EscrowError::Unavailable(e.to_string()),
        keyring::Error::BadEncoding(_) => EscrowError::Malformed {
            account: slot.account(principal),
        },
        other => EscrowError::Backend(other.to_string()),
    }
}

impl KeyEscrow for KeyringEscrow {
    fn store(&self, principal: &str, slot: KeySlot, key: &SecretKey) -> Result<(), EscrowError> {
        let entry = self.entry(principal, slot)?;
        let encoded = key.to_hex();
        entry
            .set_password(&encoded)
            .map_err(|e| map_keyring_error(e, principal, slot))?;
        debug!(principal, %slot, "key escrowed in keyring");
        Ok(())
    }

    fn retrieve(&self, principal: &str, slot: KeySlot) -> Result<SecretKey, EscrowError> {
        let entry = self.entry(principal, slot)?;
        let encoded = Zeroizing::new(
            entry
                .get_password()
                .map_err(|e| map_keyring_error(e, principal, slot))?,
        );
        SecretKey::from_hex(&encoded).map_err(|_| EscrowError::Malformed {
            account: slot.account(principal),
        })
    }

    fn delete(&self, principal: &str, slot: KeySlot) -> Result<(), EscrowError> {
        let entry = self.entry(principal, slot)?;
        match entry.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                debug!(principal, %slot, "keyring entry removed");
                Ok(())
            }
            Err(e) => Err(map_keyring_error(e, principal, slot)),
        }
    }

    fn is_available(&self) -> bool {
        keyring_probe()
    }

    fn name(&self) -> &'static str {
        "keyring"
    }
}

/// No persistence. Nothing is ever stored, so nothing is ever found.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEscrow;

impl KeyEscrow for NoopEscrow {
    fn store(&self, _principal: &str, _slot: KeySlot, _key: &SecretKey) -> Result<(), EscrowError> {
        Err(EscrowError::Unavailable("key persistence is disabled".into()))
    }

    fn retrieve(&self, principal: &str, slot: KeySlot) -> Result<SecretKey, EscrowError> {
        Err(EscrowError::NotFound {
            account: slot.account(principal),
        })
    }

    fn delete(&self, _principal: &str, _slot: KeySlot) -> Result<(), EscrowError> {
        Ok(())
    }

    fn is_available(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Process-local escrow for headless runs and tests.
#[derive(Default)]
pub struct MemoryEscrow {
    entries: Mutex<HashMap<String, Zeroizing<String>>>,
}

impl MemoryEscrow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Overwrite an entry with arbitrary text, bypassing validation.
    pub fn insert_raw(&self, principal: &str, slot: KeySlot, value: &str) {
        self.entries
            .lock()
            .insert(slot.account(principal), Zeroizing::new(value.to_string()));
    }
}

impl KeyEscrow for MemoryEscrow {
    fn store(&self, principal: &str, slot: KeySlot, key: &SecretKey) -> Result<(), EscrowError> {
        self.entries.lock().insert(slot.account(principal), key.to_hex());
        Ok(())
    }

    fn retrieve(&self, principal: &str, slot: KeySlot) -> Result<SecretKey, EscrowError> {
        let account = slot.account(principal);
        let entries = self.entries.lock();
        let encoded = entries
            .get(&account)
            .ok_or_else(|| EscrowError::NotFound {
                account: account.clone(),
            })?;
        SecretKey::from_hex(encoded).map_err(|_| EscrowError::Malformed { account })
    }

    fn delete(&self, principal: &str, slot: KeySlot) -> Result<(), EscrowError> {
        self.entries.lock().remove(&slot.account(principal));
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher;

    #[test]
    fn account_names_embed_principal_and_label() {
        assert_eq!(
            KeySlot::SessionKey.account("alice"),
            "alice_session_encryption_key"
        );
        assert_eq!(KeySlot::Credential.account("alice"), "alice_credential_key");
    }

    #[test]
    fn memory_escrow_roundtrip_and_idempotent_delete() {
        let escrow = MemoryEscrow::new();
        let key = SecretKey::generate();
        escrow.store("alice", KeySlot::SessionKey, &key).unwrap();

        let back = escrow.retrieve("alice", KeySlot::SessionKey).unwrap();
        assert!(back.ct_eq(&key));
        assert!(matches!(
            escrow.retrieve("alice", KeySlot::Credential),
            Err(EscrowError::NotFound { .. })
        ));

        escrow.delete("alice", KeySlot::SessionKey).unwrap();
        escrow.delete("alice", KeySlot::SessionKey).unwrap();
        assert!(escrow.is_empty());
    }

    #[test]
    fn malformed_entry_is_reported() {
        let escrow = MemoryEscrow::new();
        escrow.insert_raw("bob", KeySlot::SessionKey, "not-hex");
        assert!(matches!(
            escrow.retrieve("bob", KeySlot::SessionKey),
            Err(EscrowError::Malformed { .. })
        ));
    }

    #[test]
    fn noop_escrow_never_persists() {
        let escrow = NoopEscrow;
        assert!(!escrow.is_available());
        assert!(matches!(
            escrow.store("alice", KeySlot::SessionKey, &SecretKey::generate()),
            Err(EscrowError::Unavailable(_))
        ));
        assert!(matches!(
            escrow.retrieve("alice", KeySlot::SessionKey),
            Err(EscrowError::NotFound { .. })
        ));
        escrow.delete("alice", KeySlot::SessionKey).unwrap();
    }

    #[test]
    fn disabled_preference_selects_noop() {
        let escrow = select_escrow(EscrowPreference::Disabled);
        assert_eq!(escrow.name(), "disabled");
        assert!(!escrow.is_available());
    }

    #[test]
    fn stale_key_is_purged_after_failed_verification() {
        let escrow = MemoryEscrow::new();
        let real = SecretKey::generate();
        let blob = cipher::encrypt(b"session", real.as_ref()).unwrap();

        escrow
            .store("carol", KeySlot::SessionKey, &SecretKey::generate())
            .unwrap();
        let err = retrieve_verified(&escrow, "carol", KeySlot::SessionKey, |k| {
            cipher::decrypt(blob.as_bytes(), k.as_ref())
        })
        .unwrap_err();
        assert!(matches!(err, EscrowError::Stale { .. }));
        assert!(escrow.is_empty());

        escrow.store("carol", KeySlot::SessionKey, &real).unwrap();
        let (_, plain) = retrieve_verified(&escrow, "carol", KeySlot::SessionKey, |k| {
            cipher::decrypt(blob.as_bytes(), k.as_ref())
        })
        .unwrap();
        assert_eq!(&plain[..], b"session");
        assert_eq!(escrow.len(), 1);
    }

    #[test]
    fn data_key_is_created_once() {
        let escrow = MemoryEscrow::new();
        let first = load_or_create_data_key(&escrow, "dave").unwrap();
        let second = load_or_create_data_key(&escrow, "dave").unwrap();
        assert!(first.ct_eq(&second));
        assert!(escrow.retrieve("dave", KeySlot::SessionKey).is_err());
    }

    #[test]
    fn data_key_needs_persistence() {
        assert!(matches!(
            load_or_create_data_key(&NoopEscrow, "erin"),
            Err(EscrowError::Unavailable(_))
        ));
    }
}
