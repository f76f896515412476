//! Relation client with read-through/write-through caching

use super::client::RelationApi;
use super::types::{CommonFollowings, ListData, RelationPage};
use crate::cache::KeyValueStore;
use crate::graph::Uid;
use crate::{metrics, FollowGraphError, Result};
use std::sync::Arc;

/// Cache key of the common-followings lookup for `uid`
pub fn common_followings_key(uid: Uid) -> String {
    format!("common_followings_{}", uid)
}

/// Fetchers used by the acquisition pipeline and the CLI
///
/// Only common-followings lookups are cached. Cache problems never fail a
/// lookup: an unreadable entry is a miss and a failed write is logged.
#[derive(Clone)]
pub struct RelationClient {
    api: Arc<dyn RelationApi>,
    cache: Arc<dyn KeyValueStore>,
}

impl RelationClient {
    pub fn new(api: Arc<dyn RelationApi>, cache: Arc<dyn KeyValueStore>) -> Self {
        Self { api, cache }
    }

    pub fn cache(&self) -> &Arc<dyn KeyValueStore> {
        &self.cache
    }

    /// One page of the accounts `uid` follows
    pub async fn fetch_followings_page(
        &self,
        uid: Uid,
        page_size: u32,
        page: u32,
    ) -> Result<RelationPage> {
        let data = self.api.followings(uid, page_size, page).await?;
        Ok(data.into())
    }

    /// One page of the accounts following `uid`
    ///
    /// `offset` is the continuation token of the previous page, if any.
    pub async fn fetch_fans_page(
        &self,
        uid: Uid,
        page_size: u32,
        page: u32,
        offset: Option<&str>,
    ) -> Result<RelationPage> {
        let data = self.api.fans(uid, page_size, page, offset).await?;
        Ok(data.into())
    }

    /// Accounts followed by both the current user and `uid`
    ///
    /// With `use_cache` a live cache entry is returned without a network
    /// call. A network result is always written back, even when `use_cache`
    /// is false.
    pub async fn fetch_common_followings(
        &self,
        uid: Uid,
        use_cache: bool,
    ) -> Result<CommonFollowings> {
        let key = common_followings_key(uid);

        if use_cache {
            if let Some(data) = self.cached(&key).await {
                metrics::record_cache_hit();
                tracing::debug!(%uid, count = data.list.len(), "Common followings from cache");
                return Ok(CommonFollowings {
                    items: data.list,
                    from_cache: true,
                });
            }
            metrics::record_cache_miss();
        }

        let data = self.api.common_followings(uid).await?;
        self.store(&key, &data).await;

        tracing::debug!(%uid, count = data.list.len(), "Common followings from network");
        Ok(CommonFollowings {
            items: data.list,
            from_cache: false,
        })
    }

    /// Uid of the session owner as reported by the identity endpoint
    pub async fn current_uid_remote(&self) -> Result<Uid> {
        let nav = self.api.nav().await?;
        if !nav.is_login || nav.mid.get() == 0 {
            return Err(FollowGraphError::AuthenticationRequired(
                "session is not logged in".to_string(),
            ));
        }
        tracing::debug!(uid = %nav.mid, name = %nav.uname, "Resolved identity remotely");
        Ok(nav.mid)
    }

    async fn cached(&self, key: &str) -> Option<ListData> {
        let value = match self.cache.get(key).await {
            Ok(Some(value)) => value,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_value(value) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!(key, error = %e, "Cached common followings have unexpected shape");
                None
            }
        }
    }

    async fn store(&self, key: &str, data: &ListData) {
        let value = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "Could not serialize common followings");
                return;
            }
        };
        if let Err(e) = self.cache.set(key, value).await {
            metrics::record_cache_write_error();
            tracing::warn!(key, error = %e, "Cache write failed");
        }
    }
}
