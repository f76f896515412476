//! Type-safe user identifier

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Numeric account identifier, unique within the platform
///
/// Serialized transparently as the bare number so it matches the wire format
/// of the remote API.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Uid(u64);

impl Uid {
    /// Create a new Uid
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the underlying number
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Extract a uid from a profile URL such as `https://space.example.com/12345/fans`
    ///
    /// Looks for a host label starting with `space.` followed by a numeric
    /// first path segment.
    pub fn from_space_url(url: &str) -> Option<Self> {
        let rest = url.split("://").nth(1).unwrap_or(url);
        let mut parts = rest.splitn(2, '/');
        let host = parts.next()?;
        if !host.starts_with("space.") {
            return None;
        }
        let segment = parts.next()?.split(['/', '?', '#']).next()?;
        segment.parse::<u64>().ok().filter(|id| *id != 0).map(Self)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<u64> for Uid {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl FromStr for Uid {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}
