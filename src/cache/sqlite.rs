//! SQLite cache implementation
//!
//! The higher-capacity backend. The connection sits behind a mutex and every
//! statement runs on the blocking pool so callers on the async runtime never
//! stall on disk I/O.

use super::{now_millis, CacheEntry, KeyValueStore};
use crate::{FollowGraphError, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// SQLite-backed key/value cache
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
    ttl: Duration,
}

impl SqliteStore {
    /// Open or create a cache database
    pub fn open(path: impl Into<PathBuf>, ttl: Duration, wal_mode: bool) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Opening cache database");

        let conn = Connection::open(&path)?;
        if wal_mode {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expiry INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cache_expiry ON cache(expiry);
            "#,
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
            ttl,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| {
                FollowGraphError::StorageUnavailable("sqlite connection lock poisoned".to_string())
            })?;
            f(&guard)
        })
        .await
        .map_err(|e| FollowGraphError::StorageUnavailable(format!("sqlite task failed: {}", e)))?
    }

    /// Write a fully-formed entry, keeping its expiry as given
    pub async fn put_entry(&self, key: &str, entry: CacheEntry) -> Result<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let value = serde_json::to_string(&entry.data)?;
            conn.execute(
                "INSERT OR REPLACE INTO cache (key, value, expiry) VALUES (?, ?, ?)",
                params![key, value, entry.expiry],
            )?;
            Ok(())
        })
        .await
    }

    /// Every stored key, expired ones included
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM cache ORDER BY key")?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(keys)
        })
        .await
    }

    /// Delete every expired entry, returning how many were removed
    pub async fn purge_expired(&self) -> Result<usize> {
        let now = now_millis();
        let removed = self
            .with_conn(move |conn| Ok(conn.execute("DELETE FROM cache WHERE expiry < ?", [now])?))
            .await?;
        if removed > 0 {
            tracing::info!(removed, "Purged expired cache entries");
        }
        Ok(removed)
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let row: Option<(String, i64)> = conn
                .query_row(
                    "SELECT value, expiry FROM cache WHERE key = ?",
                    [&key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((value, expiry)) = row else {
                return Ok(None);
            };

            if now_millis() > expiry {
                tracing::debug!(key = %key, "Cache entry expired");
                conn.execute("DELETE FROM cache WHERE key = ?", [&key])?;
                return Ok(None);
            }

            let data = serde_json::from_str(&value).map_err(|e| {
                FollowGraphError::MalformedCacheEntry {
                    key: key.clone(),
                    reason: e.to_string(),
                }
            })?;
            Ok(Some(data))
        })
        .await
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.put_entry(key, CacheEntry::new(value, self.ttl)).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM cache WHERE key = ?", [&key])?;
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        tracing::info!("Clearing sqlite cache");
        self.with_conn(|conn| {
            conn.execute("DELETE FROM cache", [])?;
            Ok(())
        })
        .await
    }

    async fn len(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }
}
