//! Incremental graph folder
//!
//! Merges node and link deltas into a running dataset. Nodes live in an arena
//! (`Vec<GraphNode>`) addressed through a `uid -> slot` index, so identity is
//! explicit and never depends on which copy of a node a caller holds.

use super::ids::Uid;
use super::node::{GraphLink, GraphNode, LinkDelta, Position};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Plain snapshot of the graph, as handed to a renderer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDataset {
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphLink>,
}

/// Derived counters, recomputed on every merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub link_count: usize,
}

/// Hover-highlight side table for one node
#[derive(Debug, Clone, Default)]
pub struct Adjacency {
    /// Opposite endpoint of every accepted link touching this node
    pub neighbors: Vec<Uid>,
    /// Every accepted link touching this node
    pub links: Vec<GraphLink>,
}

/// Running graph state fed by the acquisition pipeline
#[derive(Debug, Default)]
pub struct GraphState {
    nodes: Vec<GraphNode>,
    adjacency: Vec<Adjacency>,
    index: HashMap<Uid, usize>,
    links: Vec<GraphLink>,
    link_keys: HashSet<(Uid, Uid)>,
    stats: GraphStats,
}

impl GraphState {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a snapshot, keeping positions
    pub fn from_dataset(dataset: GraphDataset) -> Self {
        let mut state = Self::new();
        state.apply_node_delta(dataset.nodes);
        state.apply_link_delta(dataset.links.into_iter().map(LinkDelta::from));
        state
    }

    /// Merge new nodes, dropping uids that are already present
    ///
    /// First write wins: a known node's attributes and position are left
    /// untouched. Returns the number of nodes actually added.
    pub fn apply_node_delta<I, N>(&mut self, nodes: I) -> usize
    where
        I: IntoIterator<Item = N>,
        N: Into<GraphNode>,
    {
        let mut added = 0;
        for node in nodes {
            let node = node.into();
            let uid = node.uid();
            if self.index.contains_key(&uid) {
                continue;
            }
            self.index.insert(uid, self.nodes.len());
            self.nodes.push(node);
            self.adjacency.push(Adjacency::default());
            added += 1;
        }

        if added > 0 {
            self.refresh_stats();
            tracing::trace!(added, nodes = self.stats.node_count, "Applied node delta");
        }
        added
    }

    /// Merge new links, dropping duplicates by ordered `(source, target)`
    ///
    /// Endpoints are resolved to raw uids before the duplicate check. Links
    /// pointing at unknown nodes are dropped. Returns the number added.
    pub fn apply_link_delta<I>(&mut self, links: I) -> usize
    where
        I: IntoIterator<Item = LinkDelta>,
    {
        let mut added = 0;
        for delta in links {
            let (source, target) = delta.key();
            if self.link_keys.contains(&(source, target)) {
                continue;
            }

            let (Some(&a), Some(&b)) = (self.index.get(&source), self.index.get(&target)) else {
                tracing::warn!(%source, %target, "Dropping link with unknown endpoint");
                continue;
            };

            let link = GraphLink { source, target };
            self.link_keys.insert((source, target));
            self.links.push(link);

            self.adjacency[a].neighbors.push(target);
            self.adjacency[a].links.push(link);
            self.adjacency[b].neighbors.push(source);
            self.adjacency[b].links.push(link);
            added += 1;
        }

        if added > 0 {
            self.refresh_stats();
            tracing::trace!(added, links = self.stats.link_count, "Applied link delta");
        }
        added
    }

    fn refresh_stats(&mut self) {
        self.stats = GraphStats {
            node_count: self.nodes.len(),
            link_count: self.links.len(),
        };
    }

    /// Current node and link counts
    pub fn stats(&self) -> GraphStats {
        self.stats
    }

    /// Degree of every node with at least one link
    ///
    /// Single pass over the link set; a node counts every link where it is
    /// either endpoint.
    pub fn degrees(&self) -> HashMap<Uid, usize> {
        let mut degrees = HashMap::with_capacity(self.nodes.len());
        for link in &self.links {
            *degrees.entry(link.source).or_insert(0) += 1;
            *degrees.entry(link.target).or_insert(0) += 1;
        }
        degrees
    }

    pub fn node(&self, uid: Uid) -> Option<&GraphNode> {
        self.index.get(&uid).map(|&slot| &self.nodes[slot])
    }

    pub fn contains_node(&self, uid: Uid) -> bool {
        self.index.contains_key(&uid)
    }

    pub fn contains_link(&self, source: Uid, target: Uid) -> bool {
        self.link_keys.contains(&(source, target))
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn links(&self) -> &[GraphLink] {
        &self.links
    }

    /// Adjacency side table for a node
    pub fn adjacency(&self, uid: Uid) -> Option<&Adjacency> {
        self.index.get(&uid).map(|&slot| &self.adjacency[slot])
    }

    /// Record a renderer-assigned position. Returns false for unknown uids.
    pub fn set_position(&mut self, uid: Uid, position: Position) -> bool {
        match self.index.get(&uid) {
            Some(&slot) => {
                self.nodes[slot].position = Some(position);
                true
            }
            None => false,
        }
    }

    /// Copy the current dataset
    pub fn snapshot(&self) -> GraphDataset {
        GraphDataset {
            nodes: self.nodes.clone(),
            links: self.links.clone(),
        }
    }

    /// Drop every node and link
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Remove nodes without links and rebuild the side tables
    ///
    /// Returns the number of nodes removed. Positions of the surviving nodes
    /// are kept.
    pub fn remove_isolated(&mut self) -> usize {
        let pruned = prune_isolated(&self.snapshot());
        if pruned.removed > 0 {
            *self = Self::from_dataset(pruned.dataset);
        }
        pruned.removed
    }

    /// Find nodes by exact uid, falling back to a case-insensitive name match
    pub fn search(&self, query: &str) -> Vec<&GraphNode> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }

        if let Ok(uid) = query.parse::<Uid>() {
            if let Some(node) = self.node(uid) {
                return vec![node];
            }
        }

        let needle = query.to_lowercase();
        self.nodes
            .iter()
            .filter(|n| n.profile.display_name.to_lowercase().contains(&needle))
            .collect()
    }

    /// Number of user pairs linked in both directions
    pub fn mutual_pair_count(&self) -> usize {
        self.links
            .iter()
            .filter(|l| l.source < l.target && self.link_keys.contains(&(l.target, l.source)))
            .count()
    }

    /// Links whose reverse link is also present
    pub fn mutual_links(&self) -> Vec<GraphLink> {
        self.links
            .iter()
            .filter(|l| self.link_keys.contains(&(l.target, l.source)))
            .copied()
            .collect()
    }
}

/// Result of [`prune_isolated`]
#[derive(Debug, Clone)]
pub struct PrunedDataset {
    pub dataset: GraphDataset,
    pub removed: usize,
}

/// Remove every node with zero incident links
///
/// Pure function over a snapshot; links are untouched.
pub fn prune_isolated(dataset: &GraphDataset) -> PrunedDataset {
    let connected: HashSet<Uid> = dataset
        .links
        .iter()
        .flat_map(|l| [l.source, l.target])
        .collect();

    let nodes: Vec<GraphNode> = dataset
        .nodes
        .iter()
        .filter(|n| connected.contains(&n.uid()))
        .cloned()
        .collect();
    let removed = dataset.nodes.len() - nodes.len();

    PrunedDataset {
        dataset: GraphDataset {
            nodes,
            links: dataset.links.clone(),
        },
        removed,
    }
}
