//! Persistent cache layer
//!
//! Two backends sit behind the [`KeyValueStore`] trait:
//!
//! - [`LocalStore`]: synchronous, quota-limited JSON file (the legacy store)
//! - [`SqliteStore`]: asynchronous, transactional SQLite table
//!
//! [`CacheManager`] composes them: SQLite first, falling back to the local
//! store on initialisation or write failure, and reading through to the local
//! store on a miss so entries written before migration stay visible.
//! [`MigrationCoordinator`] copies legacy entries into SQLite once.

mod local;
mod manager;
pub mod migration;
mod sqlite;

pub use local::{LocalStore, DEFAULT_LOCAL_QUOTA_BYTES};
pub use manager::{CacheConfig, CacheManager, CacheStats, StorageMode};
pub use migration::{MigrationCoordinator, MigrationStats};
pub use sqlite::SqliteStore;

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Namespace prepended to every key in the local store
pub const KEY_PREFIX: &str = "followgraph_";

/// Default entry lifetime in days
pub const DEFAULT_EXPIRY_DAYS: u32 = 30;

/// Convert a day count to an entry lifetime
pub fn expiry_days(days: u32) -> Duration {
    Duration::from_secs(u64::from(days) * 24 * 60 * 60)
}

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Serialized form of a cached value in both stores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Opaque payload
    pub data: serde_json::Value,

    /// Expiry as epoch milliseconds
    pub expiry: i64,
}

impl CacheEntry {
    /// Wrap a payload expiring `ttl` from now
    pub fn new(data: serde_json::Value, ttl: Duration) -> Self {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self {
            data,
            expiry: now_millis().saturating_add(ttl_ms),
        }
    }

    /// An entry is logically absent once `now > expiry`
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms > self.expiry
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }
}

/// Durable key/value store with per-entry expiry
///
/// `get` treats expired entries as misses and deletes them. `set` always
/// overwrites and restarts the expiry window.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    /// Number of stored entries, expired ones included
    async fn len(&self) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_expiry_boundary() {
        let entry = CacheEntry {
            data: serde_json::json!(1),
            expiry: 1_000,
        };
        assert!(!entry.is_expired_at(999));
        assert!(!entry.is_expired_at(1_000));
        assert!(entry.is_expired_at(1_001));
    }

    #[test]
    fn test_entry_wire_format() {
        let entry = CacheEntry {
            data: serde_json::json!({"a": 1}),
            expiry: 42,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"data":{"a":1},"expiry":42}"#);
    }

    #[test]
    fn test_expiry_days() {
        assert_eq!(expiry_days(1), Duration::from_secs(86_400));
        assert_eq!(expiry_days(DEFAULT_EXPIRY_DAYS), Duration::from_secs(30 * 86_400));
    }
}
