//! followgraph - incremental follow-graph acquisition with a dual-store cache
//!
//! Pages through a user's follow list, looks up the "common followings" of
//! every followed account under a rate budget, caches those lookups and folds
//! the results into a live graph that keeps layout state across updates.
//!
//! # Architecture
//!
//! - **api**: Remote relation endpoints, cached common-followings client, retry
//! - **cache**: Key/value stores (local JSON, SQLite), fallback façade, migration
//! - **pipeline**: Pausable, cancellable acquisition runs
//! - **graph**: Uid-indexed graph state folded from node and link deltas
//! - **config**: YAML configuration and validation
//! - **commands**: CLI definitions

pub mod api;
pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
pub mod graph;
pub mod logging;
pub mod metrics;
pub mod pipeline;

// Re-exports
pub use error::{FollowGraphError, Result};
