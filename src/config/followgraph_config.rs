//! followgraph configuration file handling
//!
//! Loads and manages the ~/.config/followgraph/config.yaml file.

use crate::api::RetryPolicy;
use crate::cache::CacheConfig;
use crate::graph::Uid;
use crate::pipeline::RelationMode;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Remote API settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL the endpoint paths are appended to
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Session cookie sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,

    /// Known uid of the current user; skips the identity request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uid>,

    /// Profile page URL (`https://space.<host>/<uid>`) to take the uid from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
}

fn default_base_url() -> String {
    "https://api.bilibili.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            cookie: None,
            uid: None,
            profile_url: None,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Uid resolvable without a network call
    pub fn local_uid(&self) -> Option<Uid> {
        self.uid
            .or_else(|| self.profile_url.as_deref().and_then(Uid::from_space_url))
    }
}

/// How per-user lookups are scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationModeKind {
    #[default]
    Sequential,
    Batched,
}

/// Acquisition pipeline pacing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Items requested per list page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Delay between list pages
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,

    /// Delay after a lookup that hit the network
    #[serde(default = "default_network_delay_ms")]
    pub network_delay_ms: u64,

    /// Delay after a lookup served from cache
    #[serde(default = "default_cache_delay_ms")]
    pub cache_delay_ms: u64,

    /// Upper bound between control-state checks while paused
    #[serde(default = "default_pause_poll_ms")]
    pub pause_poll_ms: u64,

    /// Consult the cache before per-user lookups
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,

    #[serde(default)]
    pub relation_mode: RelationModeKind,

    /// Parallel lookups per batch (batched mode)
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,

    /// Delay after each batch (batched mode)
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Retry policy for list page requests
    #[serde(default)]
    pub page_retry: RetryPolicy,
}

fn default_page_size() -> u32 {
    50
}

fn default_page_delay_ms() -> u64 {
    200
}

fn default_network_delay_ms() -> u64 {
    300
}

fn default_cache_delay_ms() -> u64 {
    10
}

fn default_pause_poll_ms() -> u64 {
    100
}

fn default_use_cache() -> bool {
    true
}

fn default_batch_concurrency() -> usize {
    5
}

fn default_batch_delay_ms() -> u64 {
    1_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            page_delay_ms: default_page_delay_ms(),
            network_delay_ms: default_network_delay_ms(),
            cache_delay_ms: default_cache_delay_ms(),
            pause_poll_ms: default_pause_poll_ms(),
            use_cache: default_use_cache(),
            relation_mode: RelationModeKind::default(),
            batch_concurrency: default_batch_concurrency(),
            batch_delay_ms: default_batch_delay_ms(),
            page_retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn relation_mode(&self) -> RelationMode {
        match self.relation_mode {
            RelationModeKind::Sequential => RelationMode::Sequential,
            RelationModeKind::Batched => RelationMode::Batched {
                concurrency: self.batch_concurrency.max(1),
                batch_delay: Duration::from_millis(self.batch_delay_ms),
            },
        }
    }
}

/// followgraph configuration
///
/// Represents the complete ~/.config/followgraph/config.yaml file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FollowGraphConfig {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl FollowGraphConfig {
    /// Load configuration from the default path, falling back to defaults
    /// when no file exists
    pub fn load_default() -> Result<Self> {
        Self::load_or_default(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::FollowGraphError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading followgraph configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            base_url = %config.api.base_url,
            storage = ?config.cache.storage,
            relation_mode = ?config.pipeline.relation_mode,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Load `path` if it exists, otherwise return the default configuration
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving followgraph configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Get the default config path (~/.config/followgraph/config.yaml)
    pub fn default_path() -> PathBuf {
        // Always use ~/.config for consistency across platforms (macOS, Linux)
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("followgraph");
        path.push("config.yaml");
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StorageMode;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_defaults() {
        let config = FollowGraphConfig::default();
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.cache.expiry_days, 30);
        assert_eq!(config.cache.storage, StorageMode::Auto);
        assert_eq!(config.pipeline.page_size, 50);
        assert_eq!(config.pipeline.page_delay_ms, 200);
        assert_eq!(config.pipeline.network_delay_ms, 300);
        assert_eq!(config.pipeline.cache_delay_ms, 10);
        assert_eq!(config.pipeline.relation_mode(), RelationMode::Sequential);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
api:
  uid: 1234
pipeline:
  relation_mode: batched
  batch_concurrency: 8
"#;
        let config: FollowGraphConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.api.uid, Some(Uid::new(1234)));
        assert_eq!(config.api.base_url, "https://api.bilibili.com");
        assert_eq!(config.pipeline.page_size, 50);
        assert_eq!(
            config.pipeline.relation_mode(),
            RelationMode::Batched {
                concurrency: 8,
                batch_delay: Duration::from_millis(1_000),
            }
        );
    }

    #[test]
    fn test_local_uid() {
        let mut api = ApiConfig::default();
        assert_eq!(api.local_uid(), None);

        api.profile_url = Some("https://space.bilibili.com/777".to_string());
        assert_eq!(api.local_uid(), Some(Uid::new(777)));

        api.uid = Some(Uid::new(5));
        assert_eq!(api.local_uid(), Some(Uid::new(5)));
    }

    #[test]
    fn test_save_and_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        let mut config = FollowGraphConfig::default();
        config.api.cookie = Some("SESSDATA=abc".to_string());
        config.cache.storage = StorageMode::Local;
        config.save(path).unwrap();

        let loaded = FollowGraphConfig::load(path).unwrap();
        assert_eq!(loaded.api, config.api);
        assert_eq!(loaded.cache.storage, StorageMode::Local);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(FollowGraphConfig::load("/nonexistent/config.yaml").is_err());

        let config = FollowGraphConfig::load_or_default("/nonexistent/config.yaml").unwrap();
        assert_eq!(config.pipeline.page_size, 50);
    }

    #[test]
    fn test_default_path() {
        let path = FollowGraphConfig::default_path();
        assert!(path.ends_with("followgraph/config.yaml"));
    }

    #[test]
    fn test_serialization() {
        let yaml = serde_yaml::to_string(&FollowGraphConfig::default()).unwrap();
        assert!(yaml.contains("api:"));
        assert!(yaml.contains("cache:"));
        assert!(yaml.contains("pipeline:"));
        assert!(!yaml.contains("cookie:"));
    }
}
