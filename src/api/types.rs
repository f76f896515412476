//! Wire types of the relation API and the shapes the client returns

use crate::graph::{GraphNode, Uid, UserProfile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response envelope shared by every endpoint
///
/// `code == 0` means success; anything else carries `message`.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

/// One account in a following/fan/common-followings list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationItem {
    pub mid: Uid,
    pub uname: String,
    #[serde(default)]
    pub face: String,
    #[serde(default)]
    pub sign: String,
    /// Follow time, epoch seconds
    #[serde(default)]
    pub mtime: i64,
    /// Relation code, see [`Relation`]
    #[serde(default)]
    pub attribute: i64,
}

impl RelationItem {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            uid: self.mid,
            display_name: self.uname.clone(),
            avatar_url: self.face.clone(),
        }
    }

    pub fn relation(&self) -> Relation {
        Relation::from_code(self.attribute)
    }

    /// Follow time, if the API supplied one
    pub fn followed_at(&self) -> Option<DateTime<Utc>> {
        if self.mtime <= 0 {
            return None;
        }
        DateTime::from_timestamp(self.mtime, 0)
    }
}

impl From<&RelationItem> for GraphNode {
    fn from(item: &RelationItem) -> Self {
        item.profile().into()
    }
}

/// `data` payload of the list endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListData {
    #[serde(default)]
    pub list: Vec<RelationItem>,
    #[serde(default)]
    pub total: u64,
    /// Continuation token returned by the fans endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<serde_json::Value>,
}

/// `data` payload of the identity endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct NavData {
    #[serde(rename = "isLogin")]
    pub is_login: bool,
    #[serde(default)]
    pub mid: Uid,
    #[serde(default)]
    pub uname: String,
}

/// One page of a paginated list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationPage {
    pub items: Vec<RelationItem>,
    pub total_count: u64,
    pub offset_token: Option<String>,
}

impl From<ListData> for RelationPage {
    fn from(data: ListData) -> Self {
        let offset_token = data.offset.and_then(|v| match v {
            serde_json::Value::String(s) if !s.is_empty() => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        Self {
            items: data.list,
            total_count: data.total,
            offset_token,
        }
    }
}

/// Result of a common-followings lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommonFollowings {
    pub items: Vec<RelationItem>,
    /// True when served without a network round-trip
    pub from_cache: bool,
}

impl CommonFollowings {
    pub fn uids(&self) -> impl Iterator<Item = Uid> + '_ {
        self.items.iter().map(|i| i.mid)
    }
}

/// Relation between the current user and a listed account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    None,
    Following,
    Mutual,
    Blocked,
    Other(i64),
}

impl Relation {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Relation::None,
            2 => Relation::Following,
            6 => Relation::Mutual,
            128 => Relation::Blocked,
            other => Relation::Other(other),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Relation::Following => "following",
            Relation::Mutual => "mutual",
            Relation::Blocked => "blocked",
            Relation::None | Relation::Other(_) => "not following",
        }
    }
}
