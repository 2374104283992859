//! Per-principal session lifecycle.
//!
//! ```text
//! Anonymous --login--> Authenticated --(remember)--> Persisted
//!     ^                       |                          |
//!     +--------logout---------+-----------logout---------+
//! ```
//!
//! Operations on one principal are serialized; different principals proceed
//! independently. All principals share one session file, so every write or
//! removal of it, together with the state change it implies, happens under
//! a single file guard.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::bridge::DriveBridge;
use crate::config::CoreConfig;
use crate::error::{CryptoError, EscrowError, SessionError};
use crate::escrow::{self, KeyEscrow, KeySlot};
use crate::kdf;
use crate::records::RecordStore;
use crate::safe_error::{ErrorKind, SafeError};
use crate::secret::{Salt, SecretBytes};
use crate::session::{SessionRecord, SessionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalState {
    Anonymous,
    /// Record held in memory only.
    Authenticated,
    /// Record also written to the session file, key escrowed.
    Persisted,
}

struct Active {
    state: PrincipalState,
    record: SessionRecord,
}

pub struct SessionManager<B: DriveBridge> {
    config: Arc<CoreConfig>,
    bridge: B,
    escrow: Arc<dyn KeyEscrow>,
    store: SessionStore,
    file_guard: Mutex<()>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    active: Mutex<HashMap<String, Active>>,
}

impl<B: DriveBridge> SessionManager<B> {
    /// Fails with `InvalidConfig` when the configuration does not validate,
    /// e.g. a lowered KDF cost that was not acknowledged.
    pub fn new(
        config: Arc<CoreConfig>,
        bridge: B,
        escrow: Arc<dyn KeyEscrow>,
    ) -> Result<Self, SafeError> {
        config.validate().map_err(SafeError::from_error)?;
        let store = config.session_store();
        Ok(Self {
            config,
            bridge,
            escrow,
            store,
            file_guard: Mutex::new(()),
            locks: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    pub fn state(&self, principal: &str) -> PrincipalState {
        self.active
            .lock()
            .get(principal)
            .map(|a| a.state)
            .unwrap_or(PrincipalState::Anonymous)
    }

    pub fn is_authenticated(&self, principal: &str) -> bool {
        self.state(principal) != PrincipalState::Anonymous
    }

    pub fn record(&self, principal: &str) -> Option<SessionRecord> {
        self.active.lock().get(principal).map(|a| a.record.clone())
    }

    fn lock_for(&self, principal: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(principal.to_string())
            .or_default()
            .clone()
    }

    /// Drop the table entry once no other task holds or waits on it.
    fn release_lock(&self, principal: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock();
        // the table's handle plus ours
        if Arc::strong_count(&lock) == 2 {
            locks.remove(principal);
        }
    }

    fn set_active(&self, principal: &str, state: PrincipalState, record: SessionRecord) {
        let mut active = self.active.lock();
        if state == PrincipalState::Persisted {
            // only one principal can own the session file
            for (other, entry) in active.iter_mut() {
                if other != principal && entry.state == PrincipalState::Persisted {
                    entry.state = PrincipalState::Authenticated;
                }
            }
        }
        active.insert(principal.to_string(), Active { state, record });
    }

    /// Authenticate through the bridge. With `remember`, a key is derived from
    /// the password, escrowed, and used to persist the session. The password
    /// buffer is consumed and wiped.
    pub async fn login(
        &self,
        principal: &str,
        password: SecretBytes,
        remember: bool,
    ) -> Result<PrincipalState, SafeError> {
        let lock = self.lock_for(principal);
        let _guard = lock.lock().await;

        let record = self
            .bridge
            .login(principal, &password)
            .await
            .map_err(SafeError::classify)?;
        info!(principal, remember, "login accepted");

        if !remember {
            let _file = self.file_guard.lock();
            self.purge_persisted(principal)?;
            self.set_active(principal, PrincipalState::Authenticated, record);
            return Ok(PrincipalState::Authenticated);
        }

        if !self.escrow.is_available() {
            warn!(principal, backend = self.escrow.name(), "secret store unavailable; session kept in memory");
            self.set_active(principal, PrincipalState::Authenticated, record);
            return Ok(PrincipalState::Authenticated);
        }

        let key = kdf::derive_async(password, Salt::generate(), self.config.kdf_iterations)
            .await
            .map_err(SafeError::from_error)?;

        if let Err(e) = self.escrow.store(principal, KeySlot::SessionKey, &key) {
            warn!(principal, error = %e, "could not escrow session key; session kept in memory");
            self.set_active(principal, PrincipalState::Authenticated, record);
            return Ok(PrincipalState::Authenticated);
        }

        let _file = self.file_guard.lock();
        if let Err(e) = self.store.save_session(principal, &record, &key) {
            if let Err(cleanup) = self.escrow.delete(principal, KeySlot::SessionKey) {
                warn!(principal, error = %cleanup, "could not roll back escrowed key");
            }
            self.set_active(principal, PrincipalState::Authenticated, record);
            return Err(SafeError::from_error(e));
        }

        self.set_active(principal, PrincipalState::Persisted, record);
        Ok(PrincipalState::Persisted)
    }

    /// Bootstrap from escrow and the session file. Every kind of absence
    /// lands in `Anonymous` rather than an error.
    pub async fn restore(&self, principal: &str) -> Result<PrincipalState, SafeError> {
        let lock = self.lock_for(principal);
        let _guard = lock.lock().await;

        let current = self.state(principal);
        if current != PrincipalState::Anonymous {
            return Ok(current);
        }

        let store = &self.store;
        let verified = escrow::retrieve_verified(
            self.escrow.as_ref(),
            principal,
            KeySlot::SessionKey,
            |key| match store.load_session(key) {
                Err(SessionError::Decrypt) => Err(CryptoError::Authentication),
                other => Ok(other),
            },
        );

        let (key, loaded) = match verified {
            Ok(found) => found,
            Err(EscrowError::NotFound { .. }) => {
                debug!(principal, "no escrowed session key");
                return Ok(PrincipalState::Anonymous);
            }
            Err(e) => {
                warn!(principal, error = %e, "escrowed session key unusable");
                return Ok(PrincipalState::Anonymous);
            }
        };

        let record = match loaded {
            Ok((owner, record)) if owner == principal => record,
            Ok((owner, _)) => {
                debug!(principal, %owner, "session file belongs to another principal");
                return Ok(PrincipalState::Anonymous);
            }
            Err(SessionError::NotFound) => {
                debug!(principal, "escrowed key without a session file; removing key");
                self.escrow
                    .delete(principal, KeySlot::SessionKey)
                    .map_err(SafeError::from_error)?;
                return Ok(PrincipalState::Anonymous);
            }
            Err(e @ SessionError::Io(_)) => return Err(SafeError::from_error(e)),
            Err(e) => {
                warn!(principal, error = %e, "persisted session unreadable; discarding");
                let _file = self.file_guard.lock();
                self.discard_persisted(principal)?;
                return Ok(PrincipalState::Anonymous);
            }
        };

        let record = match self.bridge.resume(principal, &record).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                let err = SafeError::classify(e);
                if err.kind() == ErrorKind::AuthenticationFailure {
                    info!(principal, "persisted session rejected; discarding");
                    let _file = self.file_guard.lock();
                    self.purge_persisted(principal)?;
                    return Ok(PrincipalState::Anonymous);
                }
                return Err(err);
            }
        };

        let _file = self.file_guard.lock();
        self.store
            .save_session(principal, &record, &key)
            .map_err(SafeError::from_error)?;
        self.set_active(principal, PrincipalState::Persisted, record);
        info!(principal, "session restored");
        Ok(PrincipalState::Persisted)
    }

    /// Sign out and purge every persisted trace of the session. The in-memory
    /// record is dropped (and wiped) only once the purge succeeded; on failure
    /// the principal keeps its state and the call can be repeated.
    pub async fn logout(&self, principal: &str) -> Result<(), SafeError> {
        let lock = self.lock_for(principal);
        let result = {
            let _guard = lock.lock().await;
            self.logout_locked(principal).await
        };
        self.release_lock(principal, lock);
        result
    }

    async fn logout_locked(&self, principal: &str) -> Result<(), SafeError> {
        if let Some(record) = self.record(principal) {
            if let Err(e) = self.bridge.logout(principal, &record).await {
                let err = SafeError::classify(e);
                warn!(principal, diagnostic = err.diagnostic(), "remote logout failed; purging local state anyway");
            }
        }

        let _file = self.file_guard.lock();
        if let Err(err) = self.purge_persisted(principal) {
            warn!(principal, diagnostic = err.diagnostic(), "could not purge persisted session; still signed in");
            return Err(err);
        }
        self.active.lock().remove(principal);
        info!(principal, "logged out");
        Ok(())
    }

    /// Open the encrypted metadata store with this principal's data key,
    /// creating the key on first use.
    pub fn open_metadata_store(&self, principal: &str) -> Result<RecordStore, SafeError> {
        let key = escrow::load_or_create_data_key(self.escrow.as_ref(), principal)
            .map_err(SafeError::from_error)?;
        if let Some(dir) = self.config.metadata_db_path().parent() {
            crate::fsutil::create_private_dir(dir).map_err(SafeError::from_error)?;
        }
        RecordStore::open(&self.config.metadata_db_path(), key.as_ref())
            .map_err(SafeError::from_error)
    }

    /// Remove the escrowed session key and, if it is this principal's, the
    /// session file. Ownership is decided here, so the caller must hold
    /// `file_guard`.
    fn purge_persisted(&self, principal: &str) -> Result<(), SafeError> {
        let owns_file = self.file_belongs_to(principal);
        self.escrow
            .delete(principal, KeySlot::SessionKey)
            .map_err(SafeError::from_error)?;
        if owns_file {
            self.store.clear_session().map_err(SafeError::from_error)?;
        }
        Ok(())
    }

    /// Caller holds `file_guard`.
    fn discard_persisted(&self, principal: &str) -> Result<(), SafeError> {
        self.escrow
            .delete(principal, KeySlot::SessionKey)
            .map_err(SafeError::from_error)?;
        self.store.clear_session().map_err(SafeError::from_error)?;
        Ok(())
    }

    fn file_belongs_to(&self, principal: &str) -> bool {
        if !self.store.exists() {
            return false;
        }
        match self.escrow.retrieve(principal, KeySlot::SessionKey) {
            Ok(key) => matches!(
                self.store.load_session(&key),
                Ok((ref owner, _)) if owner == principal
            ),
            Err(_) => false,
        }
    }
}

/// Shorthand used by callers holding a raw password.
pub fn password(bytes: impl Into<Vec<u8>>) -> SecretBytes {
    SecretBytes::new(bytes.into())
}
