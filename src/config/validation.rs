//! Configuration validation
//!
//! Validates followgraph configuration for correctness:
//! - Base URL is an http(s) URL
//! - Timeouts, quotas and page sizes are in range
//! - Profile URL, when set, carries a uid
//! - Batched mode has a usable concurrency

use super::followgraph_config::{FollowGraphConfig, RelationModeKind};
use crate::graph::Uid;
use crate::FollowGraphError;

/// Largest page size the list endpoints accept
pub const MAX_PAGE_SIZE: u32 = 50;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub section: Option<String>,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            section: None,
            field: field.into(),
            message: message.into(),
        }
    }

    fn in_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref section) = self.section {
            write!(f, "{}.{}: {}", section, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a followgraph configuration, collecting every problem
pub fn validate_config(config: &FollowGraphConfig) -> ValidationResult {
    let mut errors = Vec::new();

    // api
    let api = &config.api;
    if !is_http_url(&api.base_url) {
        errors.push(
            ValidationError::new("base_url", format!("Invalid URL: {}", api.base_url))
                .in_section("api"),
        );
    }
    if api.timeout_secs == 0 {
        errors.push(
            ValidationError::new("timeout_secs", "Timeout must be greater than 0")
                .in_section("api"),
        );
    }
    if let Some(ref url) = api.profile_url {
        if Uid::from_space_url(url).is_none() {
            errors.push(
                ValidationError::new(
                    "profile_url",
                    format!("No uid found in profile URL: {}", url),
                )
                .in_section("api"),
            );
        }
    }
    if let Some(ref cookie) = api.cookie {
        if cookie.contains(['\r', '\n']) {
            errors.push(
                ValidationError::new("cookie", "Cookie must be a single line").in_section("api"),
            );
        }
    }

    // cache
    let cache = &config.cache;
    if cache.expiry_days == 0 {
        errors.push(
            ValidationError::new("expiry_days", "Expiry must be at least one day")
                .in_section("cache"),
        );
    }
    if cache.local_quota_bytes == 0 {
        errors.push(
            ValidationError::new("local_quota_bytes", "Quota must be greater than 0")
                .in_section("cache"),
        );
    }
    if cache.sqlite_path == cache.local_path {
        errors.push(
            ValidationError::new(
                "local_path",
                "Local store and SQLite database must be different files",
            )
            .in_section("cache"),
        );
    }

    // pipeline
    let pipeline = &config.pipeline;
    if pipeline.page_size == 0 || pipeline.page_size > MAX_PAGE_SIZE {
        errors.push(
            ValidationError::new(
                "page_size",
                format!(
                    "Page size {} out of range (1-{})",
                    pipeline.page_size, MAX_PAGE_SIZE
                ),
            )
            .in_section("pipeline"),
        );
    }
    if pipeline.pause_poll_ms == 0 {
        errors.push(
            ValidationError::new("pause_poll_ms", "Interval must be greater than 0")
                .in_section("pipeline"),
        );
    }
    if pipeline.relation_mode == RelationModeKind::Batched && pipeline.batch_concurrency == 0 {
        errors.push(
            ValidationError::new(
                "batch_concurrency",
                "Batched mode needs a concurrency of at least 1",
            )
            .in_section("pipeline"),
        );
    }
    if pipeline.page_retry.multiplier < 1.0 {
        errors.push(
            ValidationError::new("page_retry.multiplier", "Multiplier must be at least 1.0")
                .in_section("pipeline"),
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_http_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    matches!(rest, Some(host) if !host.is_empty())
}

/// Validate configuration and return a Result
pub fn validate_config_result(config: &FollowGraphConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        FollowGraphError::Config(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}
