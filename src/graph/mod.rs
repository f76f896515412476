//! Core graph data structures
//!
//! Defines Uid, UserProfile, GraphNode/GraphLink and the incremental
//! GraphState folder that the acquisition pipeline writes into.

mod ids;
mod node;
mod state;

pub use ids::Uid;
pub use node::{Endpoint, GraphLink, GraphNode, LinkDelta, Position, UserProfile};
pub use state::{prune_isolated, Adjacency, GraphDataset, GraphState, GraphStats, PrunedDataset};

use std::sync::Arc;
use tokio::sync::RwLock;

/// Graph shared between the pipeline (sole writer) and its consumers
pub type SharedGraph = Arc<RwLock<GraphState>>;

/// Create an empty shared graph
pub fn shared() -> SharedGraph {
    Arc::new(RwLock::new(GraphState::new()))
}
