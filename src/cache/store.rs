use crate::error::CacheError;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// One persisted tree: the serialized payload and when it was written
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// Key-value persistence for finished trees, addressed by requester identity
pub trait CacheStore: Send + Sync {
    fn get(&self, identity: &str) -> Result<Option<CacheEntry>, CacheError>;
    fn put(&self, identity: &str, entry: &CacheEntry) -> Result<(), CacheError>;
    fn delete(&self, identity: &str) -> Result<(), CacheError>;

    /// Age of the entry at `now`, if one exists
    fn age_of(&self, identity: &str, now: DateTime<Utc>) -> Result<Option<Duration>, CacheError> {
        Ok(self.get(identity)?.map(|entry| now - entry.created_at))
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: String,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let path_str = path.as_ref().to_string_lossy().to_string();
        let conn = Connection::open(&path)?;
        let store = SqliteStore { conn: Mutex::new(conn), path: path_str };
        store.init()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteStore { conn: Mutex::new(conn), path: ":memory:".to_string() };
        store.init()?;
        Ok(store)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn init(&self) -> Result<(), CacheError> {
        let conn = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cache_entries (
                identity TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    // An unreadable timestamp reads as the epoch, i.e. long expired
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

impl CacheStore for SqliteStore {
    fn get(&self, identity: &str) -> Result<Option<CacheEntry>, CacheError> {
        let conn = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        let entry = conn
            .query_row(
                "SELECT payload, created_at FROM cache_entries WHERE identity = ?1",
                params![identity],
                |row| {
                    Ok(CacheEntry {
                        payload: row.get(0)?,
                        created_at: from_millis(row.get(1)?),
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    fn put(&self, identity: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        let conn = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        conn.execute(
            "INSERT INTO cache_entries (identity, payload, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(identity) DO UPDATE SET payload = excluded.payload, created_at = excluded.created_at",
            params![identity, entry.payload, entry.created_at.timestamp_millis()],
        )?;
        Ok(())
    }

    fn delete(&self, identity: &str) -> Result<(), CacheError> {
        let conn = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        conn.execute("DELETE FROM cache_entries WHERE identity = ?1", params![identity])?;
        Ok(())
    }
}

/// Process-local store, for tests and one-shot runs
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, identity: &str) -> Result<Option<CacheEntry>, CacheError> {
        let entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.get(identity).cloned())
    }

    fn put(&self, identity: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.insert(identity.to_string(), entry.clone());
        Ok(())
    }

    fn delete(&self, identity: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.remove(identity);
        Ok(())
    }
}
