//! Key-value persistence for counters and timestamps
//!
//! The quota engine only needs integers and instants keyed by stable
//! strings. Two backends are provided: a SQLite file that survives
//! restarts and an in-memory map for tests.

use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

use super::locks::acquire_lock;

/// Error raised by the persistence layer
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("usage database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("failed to prepare usage store location: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not determine config directory")]
    ConfigDirUnavailable,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable key-value contract required by the quota engine
pub trait UsageStore: Send + Sync {
    fn get_int(&self, key: &str) -> Result<Option<i64>>;
    fn set_int(&self, key: &str, value: i64) -> Result<()>;
    fn get_instant(&self, key: &str) -> Result<Option<DateTime<Utc>>>;
    fn set_instant(&self, key: &str, value: DateTime<Utc>) -> Result<()>;
}

/// Persistence key scheme.
///
/// These strings are stored on user devices; changing them resets
/// everyone's counters.
pub mod keys {
    use crate::billing::limits::TrackerKind;
    use crate::billing::types::UsageCategory;

    pub const TRIAL_START: &str = "trialStartDate";

    /// Counter key, e.g. `trialUsage_relationship`
    pub fn usage_count(kind: TrackerKind, category: UsageCategory) -> String {
        let prefix = match kind {
            TrackerKind::Trial => "trialUsage",
            TrackerKind::Full => "fullUsage",
        };
        format!("{}_{}", prefix, category.key_name())
    }

    /// Window-start key for a tracker
    pub fn window_start(kind: TrackerKind) -> &'static str {
        match kind {
            TrackerKind::Trial => "trialQuotaStart",
            TrackerKind::Full => "fullAccessQuotaStart",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum StoredValue {
    Int(i64),
    Instant(DateTime<Utc>),
}

/// Process-lifetime store backed by a concurrent map
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, StoredValue>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsageStore for MemoryStore {
    fn get_int(&self, key: &str) -> Result<Option<i64>> {
        Ok(match self.values.get(key).map(|v| *v.value()) {
            Some(StoredValue::Int(v)) => Some(v),
            _ => None,
        })
    }

    fn set_int(&self, key: &str, value: i64) -> Result<()> {
        self.values.insert(key.to_string(), StoredValue::Int(value));
        Ok(())
    }

    fn get_instant(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(match self.values.get(key).map(|v| *v.value()) {
            Some(StoredValue::Instant(v)) => Some(v),
            _ => None,
        })
    }

    fn set_instant(&self, key: &str, value: DateTime<Utc>) -> Result<()> {
        self.values
            .insert(key.to_string(), StoredValue::Instant(value));
        Ok(())
    }
}

/// SQLite-backed store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open the store at `path`, creating parent directories
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "Opened usage store");
        Self::with_connection(conn)
    }

    /// Store that lives only as long as this value
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY NOT NULL,
                int_value INTEGER,
                text_value TEXT
            );
        "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl UsageStore for SqliteStore {
    fn get_int(&self, key: &str) -> Result<Option<i64>> {
        let conn = acquire_lock(&self.conn);
        let result = conn
            .query_row(
                "SELECT int_value FROM kv_store WHERE key = ?",
                params![key],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional();

        match result {
            Ok(value) => Ok(value.flatten()),
            Err(rusqlite::Error::InvalidColumnType(..))
            | Err(rusqlite::Error::FromSqlConversionFailure(..)) => {
                warn!(key, "Stored counter is not an integer, treating as unset");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set_int(&self, key: &str, value: i64) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            r#"
            INSERT INTO kv_store (key, int_value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET int_value = excluded.int_value
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    fn get_instant(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = acquire_lock(&self.conn);
        let raw = conn
            .query_row(
                "SELECT text_value FROM kv_store WHERE key = ?",
                params![key],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();

        Ok(raw.and_then(|text| match DateTime::parse_from_rfc3339(&text) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(e) => {
                warn!(key, value = %text, error = %e, "Stored timestamp is corrupt, treating as unset");
                None
            }
        }))
    }

    fn set_instant(&self, key: &str, value: DateTime<Utc>) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            r#"
            INSERT INTO kv_store (key, text_value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET text_value = excluded.text_value
            "#,
            params![key, value.to_rfc3339_opts(SecondsFormat::Nanos, true)],
        )?;
        Ok(())
    }
}
