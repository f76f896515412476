//! Cache façade selecting between the SQLite and local stores

use super::{expiry_days, KeyValueStore, LocalStore, SqliteStore, DEFAULT_EXPIRY_DAYS};
use crate::{FollowGraphError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Which backend(s) the façade may use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// SQLite first, local store as fallback and read-through
    #[default]
    Auto,
    /// SQLite only; write failures are returned
    Sqlite,
    /// Local store only
    Local,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry lifetime in days
    #[serde(default = "default_expiry_days")]
    pub expiry_days: u32,

    /// Backend selection
    #[serde(default)]
    pub storage: StorageMode,

    /// Path to SQLite database file
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,

    /// Path to the local (legacy) store file
    #[serde(default = "default_local_path")]
    pub local_path: PathBuf,

    /// Byte quota of the local store
    #[serde(default = "default_local_quota")]
    pub local_quota_bytes: usize,

    /// Enable WAL mode for better concurrency
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

fn default_expiry_days() -> u32 {
    DEFAULT_EXPIRY_DAYS
}

fn config_dir() -> PathBuf {
    // Always use ~/.config for consistency across platforms (macOS, Linux)
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".config");
    path.push("followgraph");
    path
}

fn default_sqlite_path() -> PathBuf {
    config_dir().join("cache.db")
}

fn default_local_path() -> PathBuf {
    config_dir().join("local_store.json")
}

fn default_local_quota() -> usize {
    super::DEFAULT_LOCAL_QUOTA_BYTES
}

fn default_wal_mode() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiry_days: default_expiry_days(),
            storage: StorageMode::default(),
            sqlite_path: default_sqlite_path(),
            local_path: default_local_path(),
            local_quota_bytes: default_local_quota(),
            wal_mode: default_wal_mode(),
        }
    }
}

/// Entry counts per backend
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub mode: StorageMode,
    pub sqlite_entries: Option<usize>,
    pub local_entries: usize,
}

/// Preferred-with-fallback cache
///
/// The only place that knows which concrete backend is in play.
pub struct CacheManager {
    mode: StorageMode,
    sqlite: Option<Arc<SqliteStore>>,
    local: Arc<LocalStore>,
}

impl CacheManager {
    /// Open both backends according to `config`
    ///
    /// A SQLite failure is logged and the manager runs on the local store.
    /// Only a local store failure is returned.
    pub fn open(config: &CacheConfig) -> Result<Self> {
        let ttl = expiry_days(config.expiry_days);
        let local = Arc::new(LocalStore::open(
            &config.local_path,
            ttl,
            config.local_quota_bytes,
        )?);

        let sqlite = match config.storage {
            StorageMode::Local => None,
            StorageMode::Auto | StorageMode::Sqlite => {
                match SqliteStore::open(&config.sqlite_path, ttl, config.wal_mode) {
                    Ok(store) => Some(Arc::new(store)),
                    Err(e) => {
                        tracing::warn!(error = %e, "SQLite cache unavailable, using local store");
                        None
                    }
                }
            }
        };

        Ok(Self::from_stores(config.storage, sqlite, local))
    }

    /// Compose already-opened stores
    pub fn from_stores(
        mode: StorageMode,
        sqlite: Option<Arc<SqliteStore>>,
        local: Arc<LocalStore>,
    ) -> Self {
        Self {
            mode,
            sqlite,
            local,
        }
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    /// The legacy store (migration source)
    pub fn local(&self) -> Arc<LocalStore> {
        Arc::clone(&self.local)
    }

    /// The modern store, if it opened
    pub fn sqlite(&self) -> Option<Arc<SqliteStore>> {
        self.sqlite.clone()
    }

    /// Read and deserialize a typed value
    ///
    /// A payload that no longer matches `T` is treated as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await.ok().flatten()?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(key, error = %e, "Cached payload has unexpected shape");
                None
            }
        }
    }

    /// Serialize and write a typed value
    pub async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        self.set(key, serde_json::to_value(value)?).await
    }

    /// Entry counts per backend
    pub async fn stats(&self) -> Result<CacheStats> {
        let sqlite_entries = match &self.sqlite {
            Some(store) => Some(store.len().await?),
            None => None,
        };
        Ok(CacheStats {
            mode: self.mode,
            sqlite_entries,
            local_entries: self.local.len().await?,
        })
    }

    fn reads_local(&self) -> bool {
        matches!(self.mode, StorageMode::Auto | StorageMode::Local) || self.sqlite.is_none()
    }
}

#[async_trait]
impl KeyValueStore for CacheManager {
    fn name(&self) -> &'static str {
        "manager"
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        if let Some(sqlite) = &self.sqlite {
            match sqlite.get(key).await {
                Ok(Some(value)) => return Ok(Some(value)),
                // Miss: may still live in the local store from before migration
                Ok(None) => {}
                Err(e) => tracing::warn!(key, error = %e, "SQLite read failed, trying local store"),
            }
        }

        if self.reads_local() {
            return Ok(self.local.get_sync(key));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        if let Some(sqlite) = &self.sqlite {
            match sqlite.set(key, value.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if self.mode == StorageMode::Sqlite => return Err(e),
                Err(e) => tracing::warn!(key, error = %e, "SQLite write failed, using local store"),
            }
        } else if self.mode == StorageMode::Sqlite {
            return Err(FollowGraphError::StorageUnavailable(
                "SQLite cache is not open".to_string(),
            ));
        }

        self.local.set_sync(key, value).map_err(|e| {
            tracing::error!(key, error = %e, "Local store write failed");
            e
        })
    }

    async fn remove(&self, key: &str) -> Result<()> {
        if let Some(sqlite) = &self.sqlite {
            if let Err(e) = sqlite.remove(key).await {
                tracing::warn!(key, error = %e, "SQLite remove failed");
            }
        }
        if let Err(e) = self.local.remove_sync(key) {
            tracing::error!(key, error = %e, "Local store remove failed");
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        if let Some(sqlite) = &self.sqlite {
            if let Err(e) = sqlite.clear().await {
                tracing::warn!(error = %e, "SQLite clear failed");
            }
        }
        if let Err(e) = self.local.clear_sync() {
            tracing::error!(error = %e, "Local store clear failed");
        }
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        let stats = self.stats().await?;
        Ok(stats.sqlite_entries.unwrap_or(0) + stats.local_entries)
    }
}
