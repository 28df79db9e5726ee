//! Ballot numbers and accepted records.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tandem_net::ParticipantId;

/// Uniquely ordered proposal identifier.
///
/// Ballots compare lexicographically by `(number, pid)`; because every
/// participant stamps its own name, two distinct participants can never
/// produce equal ballots with the same number.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ballot {
    pub number: u64,
    pub pid: ParticipantId,
}

impl Ballot {
    /// The initial ballot a participant knows: `(0, self)`.
    #[must_use]
    pub fn zero(pid: ParticipantId) -> Self {
        Self { number: 0, pid }
    }

    /// The next ballot for `pid`, strictly above `self` regardless of pid
    /// ordering.
    #[must_use]
    pub fn increase(&self, pid: ParticipantId) -> Self {
        Self {
            number: self.number + 1,
            pid,
        }
    }
}

impl fmt::Display for Ballot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.number, self.pid)
    }
}

/// An acceptor's accepted record: the value it last voted for (if any) and
/// the ballot it voted at.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Accepted {
    pub value: Option<Bytes>,
    pub ballot: Ballot,
}

impl Accepted {
    /// The unset record an acceptor starts with.
    #[must_use]
    pub fn unset(pid: ParticipantId) -> Self {
        Self {
            value: None,
            ballot: Ballot::zero(pid),
        }
    }
}
