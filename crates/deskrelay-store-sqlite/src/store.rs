// crates/deskrelay-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Allocation Store
// Description: Durable AllocationStore backed by SQLite WAL.
// Purpose: Persist allocation records with deterministic serialization.
// Dependencies: deskrelay-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements a durable [`AllocationStore`] using `SQLite`. Each
//! save writes the canonical JSON form of an [`AllocationRecord`] together with
//! its digest. Loads verify the digest and the project key, and fail closed on
//! corruption.
//! Security posture: database contents are untrusted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use deskrelay_core::AllocationRecord;
use deskrelay_core::AllocationStore;
use deskrelay_core::ProjectId;
use deskrelay_core::StoreError;
use deskrelay_core::hashing::DEFAULT_HASH_ALGORITHM;
use deskrelay_core::hashing::HashAlgorithm;
use deskrelay_core::hashing::canonical_json_bytes;
use deskrelay_core::hashing::hash_bytes;
use deskrelay_core::unix_millis;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum serialized record size accepted by the store.
pub const MAX_RECORD_BYTES: usize = 64 * 1024;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` allocation store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteStoreConfig {
    /// Builds a config with default pragmas for `path`.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store corruption or hash mismatch.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Record exceeded the size limit.
    #[error("sqlite store payload too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual payload size in bytes.
        actual_bytes: usize,
    },
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::TooLarge {
                max_bytes,
                actual_bytes,
            } => Self::Invalid(format!(
                "record_json exceeds size limit: {actual_bytes} bytes (max {max_bytes})"
            )),
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed allocation store with WAL support.
#[derive(Clone)]
pub struct SqliteAllocationStore {
    /// Shared `SQLite` connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

/// Raw row: serialized record, digest, algorithm label.
type RecordRow = (Vec<u8>, String, String);

impl SqliteAllocationStore {
    /// Opens an `SQLite`-backed allocation store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Loads the record stored for `project_id`.
    fn load_record(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<AllocationRecord>, SqliteStoreError> {
        let row: Option<RecordRow> = {
            let guard = self
                .connection
                .lock()
                .map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))?;
            guard
                .query_row(
                    "SELECT record_json, record_hash, hash_algorithm FROM allocations WHERE \
                     project_id = ?1",
                    params![project_id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?
        };
        row.map(|row| decode_record(project_id.as_str(), row)).transpose()
    }

    /// Inserts or replaces a record.
    fn save_record(&self, record: &AllocationRecord) -> Result<(), SqliteStoreError> {
        let canonical_json = canonical_json_bytes(record)
            .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        if canonical_json.len() > MAX_RECORD_BYTES {
            return Err(SqliteStoreError::TooLarge {
                max_bytes: MAX_RECORD_BYTES,
                actual_bytes: canonical_json.len(),
            });
        }
        let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, &canonical_json);
        let saved_at = i64::try_from(unix_millis()).unwrap_or(i64::MAX);
        let guard = self
            .connection
            .lock()
            .map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))?;
        guard
            .execute(
                "INSERT INTO allocations (project_id, subnet_offset, state, record_json, \
                 record_hash, hash_algorithm, saved_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) ON \
                 CONFLICT(project_id) DO UPDATE SET subnet_offset = excluded.subnet_offset, state \
                 = excluded.state, record_json = excluded.record_json, record_hash = \
                 excluded.record_hash, hash_algorithm = excluded.hash_algorithm, saved_at = \
                 excluded.saved_at",
                params![
                    record.allocation.project_id.as_str(),
                    i64::from(record.allocation.offset),
                    record.state.as_str(),
                    canonical_json,
                    digest.value,
                    hash_algorithm_label(digest.algorithm),
                    saved_at
                ],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        drop(guard);
        Ok(())
    }

    /// Deletes the record for `project_id` if present.
    fn remove_record(&self, project_id: &ProjectId) -> Result<(), SqliteStoreError> {
        let guard = self
            .connection
            .lock()
            .map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))?;
        guard
            .execute("DELETE FROM allocations WHERE project_id = ?1", params![project_id.as_str()])
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        drop(guard);
        Ok(())
    }

    /// Lists every record ordered by project id.
    fn list_records(&self) -> Result<Vec<AllocationRecord>, SqliteStoreError> {
        let rows: Vec<(String, RecordRow)> = {
            let guard = self
                .connection
                .lock()
                .map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))?;
            let mut statement = guard
                .prepare(
                    "SELECT project_id, record_json, record_hash, hash_algorithm FROM \
                     allocations ORDER BY project_id",
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let mapped = statement
                .query_map(params![], |row| {
                    Ok((row.get(0)?, (row.get(1)?, row.get(2)?, row.get(3)?)))
                })
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            mapped
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?
        };
        rows.into_iter().map(|(project_id, row)| decode_record(&project_id, row)).collect()
    }
}

impl AllocationStore for SqliteAllocationStore {
    fn load(&self, project_id: &ProjectId) -> Result<Option<AllocationRecord>, StoreError> {
        self.load_record(project_id).map_err(StoreError::from)
    }

    fn save(&self, record: &AllocationRecord) -> Result<(), StoreError> {
        self.save_record(record).map_err(StoreError::from)
    }

    fn remove(&self, project_id: &ProjectId) -> Result<(), StoreError> {
        self.remove_record(project_id).map_err(StoreError::from)
    }

    fn list(&self) -> Result<Vec<AllocationRecord>, StoreError> {
        self.list_records().map_err(StoreError::from)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Verifies and decodes one stored row.
fn decode_record(key: &str, row: RecordRow) -> Result<AllocationRecord, SqliteStoreError> {
    let (bytes, hash_value, hash_algorithm) = row;
    if bytes.len() > MAX_RECORD_BYTES {
        return Err(SqliteStoreError::TooLarge {
            max_bytes: MAX_RECORD_BYTES,
            actual_bytes: bytes.len(),
        });
    }
    let algorithm = parse_hash_algorithm(&hash_algorithm)?;
    let expected = hash_bytes(algorithm, &bytes);
    if expected.value != hash_value {
        return Err(SqliteStoreError::Corrupt(format!("hash mismatch for project {key}")));
    }
    let record: AllocationRecord = serde_json::from_slice(&bytes)
        .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    if record.allocation.project_id.as_str() != key {
        return Err(SqliteStoreError::Invalid(
            "project_id mismatch between key and payload".to_string(),
        ));
    }
    if !record.allocation.is_canonical() {
        return Err(SqliteStoreError::Corrupt(format!(
            "allocation for project {key} does not match its offset"
        )));
    }
    Ok(record)
}

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with secure defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS allocations (
                    project_id TEXT PRIMARY KEY,
                    subnet_offset INTEGER NOT NULL,
                    state TEXT NOT NULL,
                    record_json BLOB NOT NULL,
                    record_hash TEXT NOT NULL,
                    hash_algorithm TEXT NOT NULL,
                    saved_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_allocations_offset
                    ON allocations (subnet_offset);",
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Returns the canonical hash algorithm label.
const fn hash_algorithm_label(algorithm: HashAlgorithm) -> &'static str {
    match algorithm {
        HashAlgorithm::Sha256 => "sha256",
    }
}

/// Parses a hash algorithm label.
fn parse_hash_algorithm(label: &str) -> Result<HashAlgorithm, SqliteStoreError> {
    match label {
        "sha256" => Ok(HashAlgorithm::Sha256),
        other => Err(SqliteStoreError::Invalid(format!("unsupported hash algorithm: {other}"))),
    }
}
