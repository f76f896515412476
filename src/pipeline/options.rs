//! Run options derived from the `pipeline` config section

use crate::api::RetryPolicy;
use crate::config::FollowGraphConfig;
use crate::graph::Uid;
use std::time::Duration;

/// Scheduling of per-user common-followings lookups
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelationMode {
    /// One lookup at a time, paced by where the result came from
    #[default]
    Sequential,
    /// Up to `concurrency` lookups at once, then `batch_delay`
    Batched {
        concurrency: usize,
        batch_delay: Duration,
    },
}

/// Pipeline run options
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Uid to use without asking the identity endpoint
    pub identity_hint: Option<Uid>,

    pub page_size: u32,

    /// Delay between list pages
    pub page_delay: Duration,

    /// Delay after a lookup answered by the network
    pub network_delay: Duration,

    /// Delay after a lookup answered by the cache
    pub cache_delay: Duration,

    /// Longest a paused run sleeps before re-checking control state
    pub pause_poll: Duration,

    pub use_cache: bool,

    pub relation_mode: RelationMode,

    /// Retry policy for list pages
    pub page_retry: RetryPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            identity_hint: None,
            page_size: 50,
            page_delay: Duration::from_millis(200),
            network_delay: Duration::from_millis(300),
            cache_delay: Duration::from_millis(10),
            pause_poll: Duration::from_millis(100),
            use_cache: true,
            relation_mode: RelationMode::Sequential,
            page_retry: RetryPolicy::default(),
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &FollowGraphConfig) -> Self {
        let pipeline = &config.pipeline;
        Self {
            identity_hint: config.api.local_uid(),
            page_size: pipeline.page_size.max(1),
            page_delay: Duration::from_millis(pipeline.page_delay_ms),
            network_delay: Duration::from_millis(pipeline.network_delay_ms),
            cache_delay: Duration::from_millis(pipeline.cache_delay_ms),
            pause_poll: Duration::from_millis(pipeline.pause_poll_ms.max(1)),
            use_cache: pipeline.use_cache,
            relation_mode: pipeline.relation_mode(),
            page_retry: pipeline.page_retry.clone(),
        }
    }

    /// Set the identity hint
    pub fn with_identity(mut self, uid: Uid) -> Self {
        self.identity_hint = Some(uid);
        self
    }

    /// Set the relation mode
    pub fn with_relation_mode(mut self, mode: RelationMode) -> Self {
        self.relation_mode = mode;
        self
    }

    /// Enable or disable cache reads for lookups
    pub fn with_use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Set the page retry policy
    pub fn with_page_retry(mut self, policy: RetryPolicy) -> Self {
        self.page_retry = policy;
        self
    }
}
