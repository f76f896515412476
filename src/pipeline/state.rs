//! Observable run status and the per-run acquisition record

use crate::graph::Uid;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Phase of an acquisition run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadingStatus {
    #[default]
    Idle,
    LoadingFollowings,
    LoadingRelations,
    Done,
    Error,
}

impl LoadingStatus {
    /// A run is in progress
    pub fn is_active(self) -> bool {
        matches!(self, Self::LoadingFollowings | Self::LoadingRelations)
    }

    /// A new run may start from this status
    pub fn can_start(self) -> bool {
        !self.is_active()
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::LoadingFollowings => "loading followings",
            Self::LoadingRelations => "loading relations",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

/// Progress snapshot published to consumers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadingState {
    pub status: LoadingStatus,
    /// Items processed in the current phase
    pub current: usize,
    /// Items expected in the current phase
    pub total: usize,
    /// User whose relations are being fetched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_user: Option<Uid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LoadingState {
    pub(crate) fn starting() -> Self {
        Self {
            status: LoadingStatus::LoadingFollowings,
            ..Default::default()
        }
    }

    /// Fraction of the current phase completed, in `[0, 1]`
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.current as f64 / self.total as f64).min(1.0)
    }
}

/// Everything one run has learned so far
///
/// Owned by the active run and reset when the next run starts.
#[derive(Debug, Clone, Default)]
pub struct AcquisitionState {
    pub my_uid: Option<Uid>,
    /// Followed accounts in the order the remote listed them
    pub following_uids: Vec<Uid>,
    following_set: HashSet<Uid>,
    /// Graph-relevant common followings per processed user
    pub common_followings: HashMap<Uid, Vec<Uid>>,
    /// Index into `following_uids` of the next user to look up
    pub cursor: usize,
    /// Continuation token of the last list page
    pub offset_token: Option<String>,
}

impl AcquisitionState {
    /// Append followed uids, skipping any already recorded
    ///
    /// Returns how many were new.
    pub fn record_followings(&mut self, uids: impl IntoIterator<Item = Uid>) -> usize {
        let before = self.following_uids.len();
        for uid in uids {
            if self.following_set.insert(uid) {
                self.following_uids.push(uid);
            }
        }
        self.following_uids.len() - before
    }

    pub fn follows(&self, uid: Uid) -> bool {
        self.following_set.contains(&uid)
    }

    /// Keep the commons of `uid` that the current user also follows and
    /// advance the cursor
    pub fn record_relations(&mut self, uid: Uid, commons: impl IntoIterator<Item = Uid>) -> Vec<Uid> {
        let relevant: Vec<Uid> = commons
            .into_iter()
            .filter(|other| *other != uid && self.follows(*other))
            .collect();
        self.common_followings.insert(uid, relevant.clone());
        self.cursor += 1;
        relevant
    }

    /// Users not yet looked up, in order
    pub fn pending(&self) -> &[Uid] {
        let start = self.cursor.min(self.following_uids.len());
        &self.following_uids[start..]
    }
}
