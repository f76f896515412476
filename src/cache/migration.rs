//! One-time copy of legacy local entries into the SQLite store
//!
//! Legacy entries are copied, never deleted, so a failed or partial migration
//! leaves the application fully functional on the local store.

use super::{CacheEntry, KeyValueStore, LocalStore, KEY_PREFIX};
use crate::{FollowGraphError, Result};
use serde::Serialize;
use std::sync::Arc;

/// Key (without namespace) of the completion marker
pub const MIGRATION_MARKER: &str = "migration_completed";

/// Outcome counters of one migration pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationStats {
    pub total: usize,
    pub migrated: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Copies entries from the legacy store into the modern store
pub struct MigrationCoordinator {
    legacy: Arc<LocalStore>,
    target: Arc<dyn KeyValueStore>,
}

enum EntryOutcome {
    Migrated,
    Skipped,
}

impl MigrationCoordinator {
    pub fn new(legacy: Arc<LocalStore>, target: Arc<dyn KeyValueStore>) -> Self {
        Self { legacy, target }
    }

    fn marker_key() -> String {
        format!("{}{}", KEY_PREFIX, MIGRATION_MARKER)
    }

    /// True once a non-forced migration has finished
    pub fn is_completed(&self) -> bool {
        match self.legacy.raw_get(&Self::marker_key()) {
            Ok(value) => value.as_deref() == Some("true"),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read migration marker");
                false
            }
        }
    }

    /// Forget the completion marker so the next `migrate` runs again
    pub fn reset(&self) -> Result<()> {
        self.legacy.raw_remove(&Self::marker_key())?;
        tracing::info!("Migration marker reset");
        Ok(())
    }

    /// Copy every live legacy entry into the target store
    ///
    /// Returns zeroed stats when already completed and `force` is false.
    /// Per-entry failures are counted and recorded; they never abort the
    /// batch. With `force` the marker is left exactly as it was.
    pub async fn migrate(&self, force: bool) -> MigrationStats {
        let mut stats = MigrationStats::default();

        if !force && self.is_completed() {
            tracing::debug!("Migration already completed, skipping");
            return stats;
        }

        let marker = Self::marker_key();
        let keys: Vec<String> = match self.legacy.raw_keys() {
            Ok(keys) => keys.into_iter().filter(|k| *k != marker).collect(),
            Err(e) => {
                tracing::error!(error = %e, "Could not enumerate legacy entries");
                stats.errors.push(format!("enumeration failed: {}", e));
                return stats;
            }
        };

        stats.total = keys.len();
        tracing::info!(total = stats.total, target = self.target.name(), "Starting cache migration");

        for full_key in &keys {
            match self.migrate_entry(full_key).await {
                Ok(EntryOutcome::Migrated) => {
                    stats.migrated += 1;
                    tracing::debug!(key = %full_key, "Migrated entry");
                }
                Ok(EntryOutcome::Skipped) => {
                    stats.skipped += 1;
                    tracing::debug!(key = %full_key, "Skipped entry");
                }
                Err(e) => {
                    stats.failed += 1;
                    let message = format!("{}: {}", full_key, e);
                    tracing::error!(key = %full_key, error = %e, "Failed to migrate entry");
                    stats.errors.push(message);
                }
            }
        }

        if !force {
            if let Err(e) = self.legacy.raw_set(&marker, "true".to_string()) {
                tracing::error!(error = %e, "Could not persist migration marker");
            }
        }

        tracing::info!(
            total = stats.total,
            migrated = stats.migrated,
            skipped = stats.skipped,
            failed = stats.failed,
            "Cache migration finished"
        );
        stats
    }

    async fn migrate_entry(&self, full_key: &str) -> Result<EntryOutcome> {
        let Some(raw) = self.legacy.raw_get(full_key)? else {
            return Ok(EntryOutcome::Skipped);
        };

        let entry: CacheEntry =
            serde_json::from_str(&raw).map_err(|e| FollowGraphError::MalformedCacheEntry {
                key: full_key.to_string(),
                reason: e.to_string(),
            })?;

        if entry.is_expired() {
            return Ok(EntryOutcome::Skipped);
        }

        let key = full_key.strip_prefix(KEY_PREFIX).unwrap_or(full_key);
        self.target.set(key, entry.data).await?;
        Ok(EntryOutcome::Migrated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{now_millis, SqliteStore, DEFAULT_LOCAL_QUOTA_BYTES};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(86_400);

    struct Fixture {
        _dir: TempDir,
        legacy: Arc<LocalStore>,
        target: Arc<SqliteStore>,
        coordinator: MigrationCoordinator,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let legacy = Arc::new(LocalStore::in_memory(DAY, DEFAULT_LOCAL_QUOTA_BYTES));
        let target = Arc::new(SqliteStore::open(dir.path().join("cache.db"), DAY, true).unwrap());
        let coordinator = MigrationCoordinator::new(legacy.clone(), target.clone());
        Fixture {
            _dir: dir,
            legacy,
            target,
            coordinator,
        }
    }

    fn seed(legacy: &LocalStore) {
        legacy.set_sync("common_followings_1", json!({"list": [2]})).unwrap();
        legacy.set_sync("common_followings_2", json!({"list": []})).unwrap();

        let expired = CacheEntry {
            data: json!("stale"),
            expiry: now_millis() - 1_000,
        };
        legacy
            .raw_set(
                &format!("{}old", KEY_PREFIX),
                serde_json::to_string(&expired).unwrap(),
            )
            .unwrap();
        legacy
            .raw_set(&format!("{}broken", KEY_PREFIX), "{not json".to_string())
            .unwrap();
    }

    #[tokio::test]
    async fn test_migrate_counts_each_outcome() {
        let f = fixture();
        seed(&f.legacy);

        let stats = f.coordinator.migrate(false).await;

        assert_eq!(stats.total, 4);
        assert_eq!(stats.migrated, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.errors.len(), 1);
        assert!(stats.errors[0].contains("broken"));

        assert_eq!(
            f.target.get("common_followings_1").await.unwrap(),
            Some(json!({"list": [2]}))
        );
        assert!(f.coordinator.is_completed());
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let f = fixture();
        seed(&f.legacy);

        f.coordinator.migrate(false).await;
        let second = f.coordinator.migrate(false).await;

        assert_eq!(second, MigrationStats::default());
    }

    #[tokio::test]
    async fn test_force_reruns_without_touching_marker() {
        let f = fixture();
        seed(&f.legacy);

        let forced = f.coordinator.migrate(true).await;
        assert_eq!(forced.migrated, 2);
        assert!(!f.coordinator.is_completed());

        f.coordinator.migrate(false).await;
        let before = f.target.keys().await.unwrap();

        let again = f.coordinator.migrate(true).await;
        assert_eq!(again.migrated, 2);
        assert!(f.coordinator.is_completed());

        // Overwrite semantics: no duplicates, same content
        assert_eq!(f.target.keys().await.unwrap(), before);
        assert_eq!(
            f.target.get("common_followings_2").await.unwrap(),
            Some(json!({"list": []}))
        );
    }

    #[tokio::test]
    async fn test_marker_is_not_migrated() {
        let f = fixture();
        f.coordinator.migrate(false).await;

        let stats = f.coordinator.migrate(true).await;
        assert_eq!(stats.total, 0);
        assert_eq!(f.target.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reset() {
        let f = fixture();
        f.coordinator.migrate(false).await;
        assert!(f.coordinator.is_completed());

        f.coordinator.reset().unwrap();
        assert!(!f.coordinator.is_completed());
    }

    #[tokio::test]
    async fn test_legacy_entries_are_kept() {
        let f = fixture();
        seed(&f.legacy);
        f.coordinator.migrate(false).await;

        assert_eq!(
            f.legacy.get_sync("common_followings_1"),
            Some(json!({"list": [2]}))
        );
    }
}
