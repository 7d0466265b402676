//! Core identifiers shared by the codec, the store and the topology crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest member id, in bytes, the binary codec accepts.
pub const MAX_MEMBER_ID_LENGTH: usize = 1024;

/// Represents a Raft term number for leader election
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Term(u64);

impl Term {
    /// The term of a node that has never voted or seen a leader
    pub const ZERO: Term = Term(0);

    /// Creates a new Term from a raw u64 value
    pub fn new(t: u64) -> Self {
        Term(t)
    }

    /// Returns the raw u64 value of this term
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Represents a Raft log index
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct LogIndex(u64);

impl LogIndex {
    /// A zero log index
    pub const ZERO: LogIndex = LogIndex(0);

    /// Creates a new LogIndex from a raw u64 value
    pub fn new(i: u64) -> Self {
        LogIndex(i)
    }

    /// Returns the raw u64 value of this log index
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a cluster member. Members are ordered by id, lexicographically.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(String);

impl MemberId {
    /// Creates a new MemberId
    pub fn new(id: impl Into<String>) -> Self {
        MemberId(id.into())
    }

    /// Returns the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        MemberId(id.to_string())
    }
}

impl From<String> for MemberId {
    fn from(id: String) -> Self {
        MemberId(id)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wall-clock time in milliseconds since the Unix epoch
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from milliseconds since the Unix epoch
    pub fn from_millis(millis: i64) -> Self {
        Timestamp(millis)
    }

    /// Returns the current timestamp. Clocks set before the epoch read as zero.
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Timestamp(millis)
    }

    /// Returns milliseconds since the Unix epoch
    pub fn as_millis(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
