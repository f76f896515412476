//! Remote data client
//!
//! - [`RelationApi`]: raw endpoints, implemented over HTTP by [`HttpRelationApi`]
//! - [`RelationClient`]: page fetchers and cached common-followings lookups
//! - [`with_retry`]: backoff helper the pipeline wraps page fetches in

mod client;
mod relations;
pub mod retry;
pub mod types;

pub use client::{HttpRelationApi, RelationApi};
pub use relations::{common_followings_key, RelationClient};
pub use retry::{with_retry, RetryDecision, RetryPolicy, RetryableError};
pub use types::{CommonFollowings, ListData, NavData, Relation, RelationItem, RelationPage};
