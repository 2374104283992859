use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::CacheStore;
use crate::error::ConfigError;
use crate::escrow::EscrowPreference;
use crate::fsutil;
use crate::kdf::DEFAULT_ITERATIONS;
use crate::paths;
use crate::retry::RetryPolicy;
use crate::session::{SessionStore, SESSION_FILE_NAME};

pub const METADATA_DB_NAME: &str = "state.db";

/// Everything the core needs to locate and protect its files. Built once and
/// passed down explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    pub config_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub data_dir: PathBuf,
    pub kdf_iterations: u32,
    /// Allows `kdf_iterations` below the default. Tests and constrained
    /// devices only.
    #[serde(default)]
    pub weak_kdf_acknowledged: bool,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub escrow: EscrowPreference,
}

impl CoreConfig {
    /// Platform directories, or `$DRIVE_CORE_HOME/{config,cache,data}` when set.
    pub fn from_project_dirs() -> Result<Self, ConfigError> {
        Ok(Self::with_dirs(
            paths::config_dir().ok_or(ConfigError::MissingDirectory("config"))?,
            paths::cache_dir().ok_or(ConfigError::MissingDirectory("cache"))?,
            paths::data_dir().ok_or(ConfigError::MissingDirectory("data"))?,
        ))
    }

    pub fn with_base_dir<P: AsRef<Path>>(base: P) -> Self {
        let base = base.as_ref();
        Self::with_dirs(base.join("config"), base.join("cache"), base.join("data"))
    }

    fn with_dirs(config_dir: PathBuf, cache_dir: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            config_dir,
            cache_dir,
            data_dir,
            kdf_iterations: DEFAULT_ITERATIONS,
            weak_kdf_acknowledged: false,
            retry: RetryPolicy::default(),
            escrow: EscrowPreference::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kdf_iterations == 0 {
            return Err(ConfigError::WeakKdf {
                configured: 0,
                minimum: 1,
            });
        }
        if self.kdf_iterations < DEFAULT_ITERATIONS {
            if !self.weak_kdf_acknowledged {
                return Err(ConfigError::WeakKdf {
                    configured: self.kdf_iterations,
                    minimum: DEFAULT_ITERATIONS,
                });
            }
            warn!(
                iterations = self.kdf_iterations,
                minimum = DEFAULT_ITERATIONS,
                "running with a weakened key derivation cost"
            );
        }
        self.retry.validate()
    }

    /// Create all directories, owner-only.
    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        for dir in [&self.config_dir, &self.cache_dir, &self.data_dir] {
            fsutil::create_private_dir(dir)?;
        }
        Ok(())
    }

    pub fn session_path(&self) -> PathBuf {
        self.config_dir.join(SESSION_FILE_NAME)
    }

    pub fn metadata_db_path(&self) -> PathBuf {
        self.data_dir.join(METADATA_DB_NAME)
    }

    pub fn session_store(&self) -> SessionStore {
        SessionStore::new(self.session_path())
    }

    pub fn cache_store(&self) -> CacheStore {
        CacheStore::new(&self.cache_dir)
    }
}
