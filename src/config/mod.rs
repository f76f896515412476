//! Configuration system
//!
//! Loads ~/.config/followgraph/config.yaml with support for:
//! - Remote API endpoint, timeout and session cookie
//! - Cache backend selection and expiry
//! - Pipeline pacing, batching and page retries

mod followgraph_config;
pub mod validation;

pub use crate::cache::CacheConfig;
pub use followgraph_config::{ApiConfig, FollowGraphConfig, PipelineConfig, RelationModeKind};
pub use validation::{validate_config, validate_config_result, ValidationError};
