//! Encrypted file-sync metadata.
//!
//! Backed by a single SQLCipher database. Every page is encrypted with the
//! data key; opening with the wrong key fails at open time.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::{CryptoError, StoreError};
use crate::secret::KEY_SIZE;

const SCHEMA_VERSION: i32 = 1;
const PAGE_SIZE: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
    Skipped,
    Deleted,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::InProgress => "in_progress",
            SyncStatus::Complete => "complete",
            SyncStatus::Failed => "failed",
            SyncStatus::Skipped => "skipped",
            SyncStatus::Deleted => "deleted",
        }
    }

    /// The usual flow. `upsert` does not enforce it.
    pub fn is_normal_transition(from: SyncStatus, to: SyncStatus) -> bool {
        use SyncStatus::*;
        matches!(
            (from, to),
            (_, Deleted)
                | (Pending, InProgress)
                | (InProgress, Complete)
                | (InProgress, Failed)
                | (InProgress, Skipped)
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => SyncStatus::Pending,
            "in_progress" => SyncStatus::InProgress,
            "complete" => SyncStatus::Complete,
            "failed" => SyncStatus::Failed,
            "skipped" => SyncStatus::Skipped,
            "deleted" => SyncStatus::Deleted,
            other => return Err(StoreError::InvalidRecord(format!("unknown sync status {other:?}"))),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadataRecord {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    pub is_dir: bool,
    pub hash: String,
    pub remote_path: String,
    pub local_path: String,
    pub sync_status: SyncStatus,
    /// Set by the store on first insert.
    pub created_at: DateTime<Utc>,
    /// Set by the store on every upsert.
    pub updated_at: DateTime<Utc>,
}

impl FileMetadataRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            size: 0,
            mod_time: now,
            is_dir: false,
            hash: String::new(),
            remote_path: String::new(),
            local_path: String::new(),
            sync_status: SyncStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

pub struct RecordStore {
    conn: Mutex<Connection>,
}

impl RecordStore {
    /// Open or create the store at `path` with a 32-byte data key.
    pub fn open(path: &Path, key: &[u8]) -> Result<Self, StoreError> {
        check_key(key)?;
        let conn = Connection::open(path)?;
        apply_key(&conn, "key", key)?;
        conn.execute_batch(&format!("PRAGMA cipher_page_size = {PAGE_SIZE};"))?;
        verify_key(&conn)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        info!(path = %path.display(), "metadata store opened");
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )?;
        let current: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        if current > SCHEMA_VERSION {
            return Err(StoreError::Migration(format!(
                "store schema v{current} is newer than supported v{SCHEMA_VERSION}"
            )));
        }
        if current < 1 {
            migrate_v1(&conn)?;
            debug!("metadata schema migrated to v1");
        }
        Ok(())
    }

    /// Insert, or overwrite every mutable field of an existing record.
    /// `created_at` is kept from the first insert and `updated_at` always
    /// moves forward.
    pub fn upsert(&self, record: &FileMetadataRecord) -> Result<(), StoreError> {
        if record.id.is_empty() {
            return Err(StoreError::InvalidRecord("id must not be empty".into()));
        }
        let size = i64::try_from(record.size)
            .map_err(|_| StoreError::InvalidRecord(format!("size {} out of range", record.size)))?;
        let now = Utc::now().timestamp_micros();

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO files (id, name, size, mod_time, is_dir, hash, remote_path, local_path,
                                sync_status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                size = excluded.size,
                mod_time = excluded.mod_time,
                is_dir = excluded.is_dir,
                hash = excluded.hash,
                remote_path = excluded.remote_path,
                local_path = excluded.local_path,
                sync_status = excluded.sync_status,
                updated_at = MAX(excluded.updated_at, files.updated_at + 1)",
            params![
                record.id,
                record.name,
                size,
                record.mod_time.timestamp_micros(),
                record.is_dir,
                record.hash,
                record.remote_path,
                record.local_path,
                record.sync_status.as_str(),
                now,
            ],
        )?;
        Ok(())
    }

    /// `None` when no record has this id.
    pub fn get(&self, id: &str) -> Result<Option<FileMetadataRecord>, StoreError> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM files WHERE id = ?1"),
                params![id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    pub fn list(&self) -> Result<Vec<FileMetadataRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM files ORDER BY id"))?;
        let rows = stmt.query_map([], row_to_record)?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn list_by_status(&self, status: SyncStatus) -> Result<Vec<FileMetadataRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM files WHERE sync_status = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![status.as_str()], row_to_record)?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    /// Unlike `get`, a missing id is an error here.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let affected = conn.execute("DELETE FROM files WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Re-encrypt the whole database under `new_key`.
    pub fn rekey(&self, new_key: &[u8]) -> Result<(), StoreError> {
        check_key(new_key)?;
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA journal_mode = DELETE;")?;
        apply_key(&conn, "rekey", new_key)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        info!("metadata store re-keyed");
        Ok(())
    }
}

const COLUMNS: &str = "id, name, size, mod_time, is_dir, hash, remote_path, local_path, \
                       sync_status, created_at, updated_at";

fn migrate_v1(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            size INTEGER NOT NULL,
            mod_time INTEGER NOT NULL,
            is_dir INTEGER NOT NULL DEFAULT 0,
            hash TEXT NOT NULL DEFAULT '',
            remote_path TEXT NOT NULL DEFAULT '',
            local_path TEXT NOT NULL DEFAULT '',
            sync_status TEXT NOT NULL DEFAULT 'pending',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_files_sync_status ON files(sync_status);

        INSERT OR REPLACE INTO schema_version (version) VALUES (1);
        "#,
    )?;
    Ok(())
}

fn check_key(key: &[u8]) -> Result<(), StoreError> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: key.len(),
        }
        .into());
    }
    Ok(())
}

/// Raw-key form, so SQLCipher skips its own passphrase KDF.
fn apply_key(conn: &Connection, pragma: &str, key: &[u8]) -> Result<(), StoreError> {
    let hex_key = Zeroizing::new(hex::encode(key));
    let statement = Zeroizing::new(format!("PRAGMA {pragma} = \"x'{}'\";", hex_key.as_str()));
    conn.execute_batch(&statement)?;
    Ok(())
}

fn verify_key(conn: &Connection) -> Result<(), StoreError> {
    match conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0)) {
        Ok(_) => Ok(()),
        Err(e) if e.sqlite_error_code() == Some(ErrorCode::NotADatabase) => {
            Err(StoreError::WrongKeyOrCorrupt)
        }
        Err(e) => Err(e.into()),
    }
}

fn from_micros(idx: usize, micros: i64) -> rusqlite::Result<DateTime<Utc>> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    Utc.timestamp_opt(secs, nanos).single().ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            Box::new(StoreError::InvalidRecord(format!("timestamp {micros} out of range"))),
        )
    })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<FileMetadataRecord> {
    let size: i64 = row.get(2)?;
    let status: String = row.get(8)?;
    Ok(FileMetadataRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        size: u64::try_from(size).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, Type::Integer, Box::new(e))
        })?,
        mod_time: from_micros(3, row.get(3)?)?,
        is_dir: row.get(4)?,
        hash: row.get(5)?,
        remote_path: row.get(6)?,
        local_path: row.get(7)?,
        sync_status: status
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?,
        created_at: from_micros(9, row.get(9)?)?,
        updated_at: from_micros(10, row.get(10)?)?,
    })
}
