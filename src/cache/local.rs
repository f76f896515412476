//! Synchronous, quota-limited local store
//!
//! Keeps namespaced string entries in memory and mirrors them to a JSON file
//! after every mutation. This is the legacy backend: entries written here
//! before SQLite was introduced are migrated by
//! [`MigrationCoordinator`](super::MigrationCoordinator).

use super::{CacheEntry, KeyValueStore, KEY_PREFIX};
use crate::{FollowGraphError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Default quota, matching typical browser key/value limits
pub const DEFAULT_LOCAL_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// File-backed key/value store with a byte quota
#[derive(Debug)]
pub struct LocalStore {
    path: Option<PathBuf>,
    ttl: Duration,
    quota_bytes: usize,
    entries: Mutex<BTreeMap<String, String>>,
}

impl LocalStore {
    /// Open (or create) a store backed by `path`
    ///
    /// An unreadable or corrupt file is logged and replaced by an empty store.
    pub fn open(path: impl Into<PathBuf>, ttl: Duration, quota_bytes: usize) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Local store file is corrupt, starting empty");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), entries = entries.len(), "Opened local store");

        Ok(Self {
            path: Some(path),
            ttl,
            quota_bytes,
            entries: Mutex::new(entries),
        })
    }

    /// Store that never touches the filesystem
    pub fn in_memory(ttl: Duration, quota_bytes: usize) -> Self {
        Self {
            path: None,
            ttl,
            quota_bytes,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| FollowGraphError::StorageUnavailable("local store lock poisoned".to_string()))
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(path) = &self.path {
            let json = serde_json::to_string(entries)?;
            std::fs::write(path, json).map_err(|e| {
                FollowGraphError::StorageUnavailable(format!(
                    "failed to write {}: {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Persist `next`, then make it the live map
    ///
    /// On a failed write the live map is left unchanged.
    fn commit(
        &self,
        entries: &mut MutexGuard<'_, BTreeMap<String, String>>,
        next: BTreeMap<String, String>,
    ) -> Result<()> {
        self.persist(&next)?;
        **entries = next;
        Ok(())
    }

    fn used_bytes(entries: &BTreeMap<String, String>) -> usize {
        entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    /// Read a raw value by its full (already namespaced) key
    pub fn raw_get(&self, full_key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(full_key).cloned())
    }

    /// Write a raw value by its full key, enforcing the quota
    pub fn raw_set(&self, full_key: &str, value: String) -> Result<()> {
        let mut entries = self.lock()?;

        let old = entries.get(full_key).map(|v| full_key.len() + v.len()).unwrap_or(0);
        let used = Self::used_bytes(&entries) - old + full_key.len() + value.len();
        if used > self.quota_bytes {
            return Err(FollowGraphError::StorageUnavailable(format!(
                "local store quota exceeded ({} > {} bytes)",
                used, self.quota_bytes
            )));
        }

        let mut next = entries.clone();
        next.insert(full_key.to_string(), value);
        self.commit(&mut entries, next)
    }

    /// Remove a raw value by its full key
    pub fn raw_remove(&self, full_key: &str) -> Result<()> {
        let mut entries = self.lock()?;
        if !entries.contains_key(full_key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(full_key);
        self.commit(&mut entries, next)
    }

    /// Every full key under the namespace, in key order
    pub fn raw_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .keys()
            .filter(|k| k.starts_with(KEY_PREFIX))
            .cloned()
            .collect())
    }

    /// Synchronous read; expired entries are deleted and reported as misses
    pub fn get_sync(&self, key: &str) -> Option<serde_json::Value> {
        let full_key = format!("{}{}", KEY_PREFIX, key);
        let raw = match self.raw_get(&full_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(key, error = %e, "Local store read failed");
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!(key, error = %e, "Local store entry is malformed");
                return None;
            }
        };

        if entry.is_expired() {
            tracing::debug!(key, "Local store entry expired");
            if let Err(e) = self.raw_remove(&full_key) {
                tracing::warn!(key, error = %e, "Failed to evict expired entry");
            }
            return None;
        }

        Some(entry.data)
    }

    /// Synchronous write; resets the expiry window
    pub fn set_sync(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let entry = CacheEntry::new(value, self.ttl);
        self.raw_set(&format!("{}{}", KEY_PREFIX, key), serde_json::to_string(&entry)?)
    }

    pub fn remove_sync(&self, key: &str) -> Result<()> {
        self.raw_remove(&format!("{}{}", KEY_PREFIX, key))
    }

    /// Remove every namespaced entry, leaving foreign keys alone
    pub fn clear_sync(&self) -> Result<()> {
        let mut entries = self.lock()?;
        let next = entries
            .iter()
            .filter(|(k, _)| !k.starts_with(KEY_PREFIX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.commit(&mut entries, next)
    }
}

#[async_trait]
impl KeyValueStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.get_sync(key))
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.set_sync(key, value)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.remove_sync(key)
    }

    async fn clear(&self) -> Result<()> {
        self.clear_sync()
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.raw_keys()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(86_400);

    #[test]
    fn test_set_and_get() {
        let store = LocalStore::in_memory(DAY, DEFAULT_LOCAL_QUOTA_BYTES);
        store.set_sync("k", json!({"v": 1})).unwrap();
        assert_eq!(store.get_sync("k"), Some(json!({"v": 1})));
        assert_eq!(store.get_sync("missing"), None);
    }

    #[test]
    fn test_keys_are_namespaced() {
        let store = LocalStore::in_memory(DAY, DEFAULT_LOCAL_QUOTA_BYTES);
        store.set_sync("k", json!(1)).unwrap();
        assert_eq!(store.raw_keys().unwrap(), vec![format!("{}k", KEY_PREFIX)]);
    }

    #[test]
    fn test_expired_entry_is_evicted_on_read() {
        let store = LocalStore::in_memory(Duration::from_millis(1), DEFAULT_LOCAL_QUOTA_BYTES);
        store.set_sync("k", json!("v")).unwrap();

        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(store.get_sync("k"), None);
        assert!(store.raw_get(&format!("{}k", KEY_PREFIX)).unwrap().is_none());
    }

    #[test]
    fn test_malformed_entry_is_a_miss() {
        let store = LocalStore::in_memory(DAY, DEFAULT_LOCAL_QUOTA_BYTES);
        store
            .raw_set(&format!("{}bad", KEY_PREFIX), "not json".to_string())
            .unwrap();
        assert_eq!(store.get_sync("bad"), None);
    }

    #[test]
    fn test_quota_exceeded() {
        let store = LocalStore::in_memory(DAY, 64);
        let result = store.set_sync("big", json!("x".repeat(100)));
        assert!(matches!(result, Err(FollowGraphError::StorageUnavailable(_))));
        assert_eq!(store.get_sync("big"), None);
    }

    #[test]
    fn test_overwrite_does_not_double_count_quota() {
        let store = LocalStore::in_memory(DAY, 200);
        store.set_sync("k", json!("x".repeat(50))).unwrap();
        store.set_sync("k", json!("y".repeat(50))).unwrap();
        assert_eq!(store.get_sync("k"), Some(json!("y".repeat(50))));
    }

    #[test]
    fn test_clear_keeps_foreign_keys() {
        let store = LocalStore::in_memory(DAY, DEFAULT_LOCAL_QUOTA_BYTES);
        store.set_sync("a", json!(1)).unwrap();
        store.raw_set("other_app_key", "1".to_string()).unwrap();

        store.clear_sync().unwrap();

        assert!(store.raw_keys().unwrap().is_empty());
        assert_eq!(store.raw_get("other_app_key").unwrap(), Some("1".to_string()));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("local.json");

        let store = LocalStore::open(&path, DAY, DEFAULT_LOCAL_QUOTA_BYTES).unwrap();
        store.set_sync("k", json!([1, 2, 3])).unwrap();
        drop(store);

        let reopened = LocalStore::open(&path, DAY, DEFAULT_LOCAL_QUOTA_BYTES).unwrap();
        assert_eq!(reopened.get_sync("k"), Some(json!([1, 2, 3])));
    }

    #[test]
    fn test_failed_write_leaves_entries_unchanged() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        let store =
            LocalStore::open(sub.join("local.json"), DAY, DEFAULT_LOCAL_QUOTA_BYTES).unwrap();
        store.set_sync("kept", json!(1)).unwrap();

        std::fs::remove_dir_all(&sub).unwrap();

        let result = store.set_sync("k", json!(2));
        assert!(matches!(result, Err(FollowGraphError::StorageUnavailable(_))));
        assert_eq!(store.get_sync("k"), None);

        assert!(store.remove_sync("kept").is_err());
        assert_eq!(store.get_sync("kept"), Some(json!(1)));

        assert!(store.clear_sync().is_err());
        assert_eq!(store.raw_keys().unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("local.json");
        std::fs::write(&path, "{{{").unwrap();

        let store = LocalStore::open(&path, DAY, DEFAULT_LOCAL_QUOTA_BYTES).unwrap();
        assert!(store.raw_keys().unwrap().is_empty());
    }
}
