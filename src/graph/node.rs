//! Graph nodes, links and the profile data they carry

use super::ids::Uid;
use serde::{Deserialize, Serialize};

/// Public profile of an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub uid: Uid,
    pub display_name: String,
    pub avatar_url: String,
}

impl UserProfile {
    pub fn new(uid: impl Into<Uid>, display_name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: display_name.into(),
            avatar_url: String::new(),
        }
    }

    /// Set the avatar URL
    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = url.into();
        self
    }
}

/// Last-known layout position assigned by a renderer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A node in the relationship graph
///
/// `position` is renderer-owned state. Deltas never carry it, so it survives
/// every incremental update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    #[serde(flatten)]
    pub profile: UserProfile,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl GraphNode {
    pub fn uid(&self) -> Uid {
        self.profile.uid
    }
}

impl From<UserProfile> for GraphNode {
    fn from(profile: UserProfile) -> Self {
        Self {
            profile,
            position: None,
        }
    }
}

/// One end of an incoming link
///
/// Consumers hand links back either with raw ids or with endpoints already
/// resolved to nodes; both forms identify the same edge.
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    Id(Uid),
    Node(GraphNode),
}

impl Endpoint {
    /// Resolve to the raw uid
    pub fn uid(&self) -> Uid {
        match self {
            Endpoint::Id(uid) => *uid,
            Endpoint::Node(node) => node.uid(),
        }
    }
}

impl From<Uid> for Endpoint {
    fn from(uid: Uid) -> Self {
        Endpoint::Id(uid)
    }
}

impl From<u64> for Endpoint {
    fn from(uid: u64) -> Self {
        Endpoint::Id(Uid::new(uid))
    }
}

impl From<GraphNode> for Endpoint {
    fn from(node: GraphNode) -> Self {
        Endpoint::Node(node)
    }
}

/// Incoming link as it arrives in a delta
#[derive(Debug, Clone, PartialEq)]
pub struct LinkDelta {
    pub source: Endpoint,
    pub target: Endpoint,
}

impl LinkDelta {
    pub fn new(source: impl Into<Endpoint>, target: impl Into<Endpoint>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Ordered identity key
    pub fn key(&self) -> (Uid, Uid) {
        (self.source.uid(), self.target.uid())
    }
}

/// Stored link: `target` is followed by `source`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphLink {
    pub source: Uid,
    pub target: Uid,
}

impl GraphLink {
    pub fn new(source: impl Into<Uid>, target: impl Into<Uid>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// True if `uid` is either endpoint
    pub fn touches(&self, uid: Uid) -> bool {
        self.source == uid || self.target == uid
    }
}

impl From<GraphLink> for LinkDelta {
    fn from(link: GraphLink) -> Self {
        LinkDelta::new(link.source, link.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_resolution() {
        let node = GraphNode::from(UserProfile::new(5u64, "five"));
        assert_eq!(Endpoint::from(node).uid(), Uid::new(5));
        assert_eq!(Endpoint::from(5u64).uid(), Uid::new(5));
    }

    #[test]
    fn test_link_delta_key_ignores_endpoint_form() {
        let node = GraphNode::from(UserProfile::new(1u64, "one"));
        let raw = LinkDelta::new(1u64, 2u64);
        let resolved = LinkDelta::new(node, 2u64);
        assert_eq!(raw.key(), resolved.key());
    }

    #[test]
    fn test_node_serialization_flattens_profile() {
        let node = GraphNode::from(UserProfile::new(9u64, "nine").with_avatar("http://a/9.png"));
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["uid"], 9);
        assert_eq!(json["display_name"], "nine");
        assert!(json.get("position").is_none());
    }
}
