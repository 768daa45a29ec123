//! Persisted key-value store backing the session registry.
//!
//! The [`Store`] trait is the seam every component goes through; nothing in
//! the crate reaches a global store directly. The shipping implementation is
//! `SQLite`-backed ([`SqliteStore`], WAL mode, schema versioned via a
//! metadata table); [`MemoryStore`] serves tests and ephemeral runs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// The current schema version.
const SCHEMA_VERSION: i32 = 1;

/// Key used to store the schema version in the metadata table.
const VERSION_KEY: &str = "schema_version";

/// SQL statement to create the registry key-value table.
const CREATE_REGISTRY_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS registry (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create the metadata table for schema bookkeeping.
const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
const SCHEMA_STATEMENTS: &[&str] = &[CREATE_REGISTRY_TABLE, CREATE_METADATA_TABLE];

/// Abstract key-value store interface.
///
/// Injected into the registry, pipeline, command channel, and admin view.
/// Implementations must tolerate concurrent callers; writers are
/// last-writer-wins with no transaction discipline, by design.
pub trait Store: Send + Sync + fmt::Debug {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unavailable.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unavailable.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete the value under `key`. Returns `true` if something was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unavailable.
    fn remove(&self, key: &str) -> Result<bool>;

    /// List all `(key, value)` pairs whose key starts with `prefix`,
    /// ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unavailable.
    fn list(&self, prefix: &str) -> Result<Vec<(String, String)>>;
}

/// `SQLite`-backed store.
#[derive(Debug)]
pub struct SqliteStore {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection, serialized behind a mutex.
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store database at the given path.
    ///
    /// Creates parent directories and initializes the schema as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema
    /// initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening registry database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::StoreOpen {
            path: path.clone(),
            source,
        })?;

        // WAL for concurrent readers (the admin view and the producer may
        // share one database file).
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        initialize_schema(&conn)?;

        info!("Registry database opened at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::StoreOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::store_unavailable("registry mutex poisoned"))?;
        f(&conn)
    }
}

impl Store for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let value = conn
                .query_row("SELECT value FROM registry WHERE key = ?1", [key], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(value)
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r"
                INSERT OR REPLACE INTO registry (key, value, updated_at)
                VALUES (?1, ?2, datetime('now'))
                ",
                params![key, value],
            )?;
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let affected = conn.execute("DELETE FROM registry WHERE key = ?1", [key])?;
            Ok(affected > 0)
        })
    }

    fn list(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        self.with_conn(|conn| {
            let pattern = format!("{prefix}%");
            let mut stmt = conn.prepare(
                "SELECT key, value FROM registry WHERE key LIKE ?1 ORDER BY key",
            )?;
            let entries = stmt
                .query_map([pattern], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(entries)
        })
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> T) -> Result<T> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::store_unavailable("memory store mutex poisoned"))?;
        Ok(f(&mut entries))
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_entries(|entries| entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_entries(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<bool> {
        self.with_entries(|entries| entries.remove(key).is_some())
    }

    fn list(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        self.with_entries(|entries| {
            entries
                .range(prefix.to_string()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
    }
}

/// Initialize the database schema and record the schema version.
fn initialize_schema(conn: &Connection) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, [])?;
    }

    let version = get_schema_version(conn)?;
    if version < SCHEMA_VERSION {
        set_schema_version(conn, SCHEMA_VERSION)?;
    }

    Ok(())
}

/// Get the schema version from the database. Returns 0 for a fresh database.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let result: std::result::Result<String, rusqlite::Error> = conn.query_row(
        "SELECT value FROM metadata WHERE key = ?1",
        [VERSION_KEY],
        |row| row.get(0),
    );

    match result {
        Ok(value) => value
            .parse()
            .map_err(|_| Error::internal(format!("invalid schema version: {value}"))),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Set the schema version in the database.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, version.to_string()),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stores() -> Vec<Box<dyn Store>> {
        vec![
            Box::new(SqliteStore::open_in_memory().expect("in-memory sqlite")),
            Box::new(MemoryStore::new()),
        ]
    }

    #[test]
    fn test_open_in_memory() {
        assert!(SqliteStore::open_in_memory().is_ok());
    }

    #[test]
    fn test_set_and_get() {
        for store in stores() {
            store.set("user/USR-1", "{}").unwrap();
            assert_eq!(store.get("user/USR-1").unwrap(), Some("{}".to_string()));
            assert_eq!(store.get("user/USR-2").unwrap(), None);
        }
    }

    #[test]
    fn test_set_replaces() {
        for store in stores() {
            store.set("k", "v1").unwrap();
            store.set("k", "v2").unwrap();
            assert_eq!(store.get("k").unwrap(), Some("v2".to_string()));
        }
    }

    #[test]
    fn test_remove() {
        for store in stores() {
            store.set("k", "v").unwrap();
            assert!(store.remove("k").unwrap());
            assert!(!store.remove("k").unwrap());
            assert_eq!(store.get("k").unwrap(), None);
        }
    }

    #[test]
    fn test_list_by_prefix() {
        for store in stores() {
            store.set("user/USR-1", "a").unwrap();
            store.set("user/USR-2", "b").unwrap();
            store.set("stop/USR-1", "true").unwrap();

            let users = store.list("user/").unwrap();
            assert_eq!(users.len(), 2);
            assert_eq!(users[0].0, "user/USR-1");
            assert_eq!(users[1].0, "user/USR-2");

            let stops = store.list("stop/").unwrap();
            assert_eq!(stops.len(), 1);

            assert!(store.list("missing/").unwrap().is_empty());
        }
    }

    #[test]
    fn test_list_empty_prefix_returns_everything() {
        for store in stores() {
            store.set("a", "1").unwrap();
            store.set("b", "2").unwrap();
            assert_eq!(store.list("").unwrap().len(), 2);
        }
    }

    #[test]
    fn test_schema_version_recorded() {
        let store = SqliteStore::open_in_memory().unwrap();
        let version = store
            .with_conn(|conn| get_schema_version(conn))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_initialize_schema_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.with_conn(|conn| initialize_schema(conn)).unwrap();
        store.with_conn(|conn| initialize_schema(conn)).unwrap();
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = std::env::temp_dir().join("geotrace-store-test");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("nested").join("registry.db");

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.path(), path.as_path());
        store.set("k", "v").unwrap();

        drop(store);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_sqlite_persists_across_reopen() {
        let dir = std::env::temp_dir().join("geotrace-store-reopen");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("registry.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.set("device/user_id", "USR-ABC").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.get("device/user_id").unwrap(),
            Some("USR-ABC".to_string())
        );

        drop(store);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
