//! # pushstore-db
//!
//! Storage layer for queued push notifications.
//!
//! All rows for one subscriber share a partition key (the UAID, or its
//! HMAC when a hash key is configured) and are ordered by a versioned sort
//! key, see [`pushstore_keys::SortKey`]. Message rows live in one table per
//! month; the router table is permanent.
//!
//! ## Layers
//!
//! - [`engine`]: the range-store contract every backend implements.
//! - [`sqlite`]: a SQLite backend of that contract.
//! - [`registry`], [`messages`], [`router`]: the notification store proper.
//! - [`migrate`]: monthly movement of subscribers between tables.
//! - [`settings`], [`stats`]: configuration and call diagnostics.

pub mod context;
pub mod engine;
pub mod messages;
pub mod migrate;
pub mod migrations;
pub mod registry;
pub mod router;
pub mod schema;
pub mod settings;
pub mod sqlite;
pub mod stats;

pub use context::TableContext;
pub use engine::{Condition, ItemKey, KeyRange, MessageItem, RangeStore, RouterItem, SetUpdate};
pub use messages::{CheckStorageResponse, FetchResult, MessageStore};
pub use migrate::migrate_user;
pub use registry::ChannelRegistry;
pub use router::{LookupOutcome, RouterTable};
pub use settings::StoreSettings;
pub use sqlite::SqliteRangeStore;
pub use stats::{CallStats, DbOp};

use std::path::Path;
use std::time::Duration;

use pushstore_keys::KeyError;
use pushstore_types::IdError;
use rusqlite::{Connection, ErrorCode};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Busy timeout used when none is configured.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Storage error types.
///
/// Absent rows and lost conditional races are not errors; operations
/// report them through their return values.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Malformed sort key or key material.
    #[error("parse error: {0}")]
    Parse(#[from] KeyError),

    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// A stored row lacks attributes its key version requires.
    #[error("malformed row {key:?}: {reason}")]
    MalformedRow { key: String, reason: String },

    /// The engine is busy or throttling. Safe to retry.
    #[error("transient storage failure: {0}")]
    Transient(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Legacy rows are read and deleted, never freshly written.
    #[error("refusing to write legacy sort key {0:?}")]
    LegacyWrite(String),

    #[error("invalid table name: {0:?}")]
    InvalidTableName(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether the caller may retry the same call unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error {
                    code: ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked,
                    ..
                },
                _,
            ) => Self::Transient(err.to_string()),
            _ => Self::Unavailable(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Open or create the store database at `path`.
///
/// Configures WAL mode and runs any pending migrations.
pub fn open(path: &Path, busy_timeout_ms: u64) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn, busy_timeout_ms)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn, DEFAULT_BUSY_TIMEOUT_MS)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Configure SQLite pragmas.
fn configure(conn: &Connection, busy_timeout_ms: u64) -> Result<()> {
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory() {
        let conn = open_memory().expect("open in-memory db");
        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("get user_version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_open_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pushstore.db");
        let conn = open(&path, 250).expect("open");
        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("get journal_mode");
        assert_eq!(mode, "wal");
        drop(conn);
        open(&path, 250).expect("reopen");
    }

    #[test]
    fn test_busy_maps_to_transient() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let err = StoreError::from(busy);
        assert!(err.is_retryable(), "{err}");

        let other = StoreError::from(rusqlite::Error::InvalidQuery);
        assert!(matches!(other, StoreError::Unavailable(_)));
        assert!(!other.is_retryable());
    }

    #[test]
    fn test_parse_errors_are_fatal() {
        let err = StoreError::from(KeyError::InvalidSortKey("badkey".to_string()));
        assert!(!err.is_retryable());
    }
}
