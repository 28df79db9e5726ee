//! Paxos wire messages.
//!
//! Every message travels in an [`Envelope`] tagged with the consensus
//! instance it belongs to and the role it is addressed to; the receiving
//! [`Processor`](crate::Processor) multiplexes on the role tag.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tandem_net::ParticipantId;

use crate::ballot::{Accepted, Ballot};

/// Which colocated role an envelope is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    ToAcceptors,
    ToLeader,
    ToLearners,
}

/// Protocol payloads.
///
/// `Prepare`/`Propose` carry the leader's name so acceptors know where to
/// reply; values are backend-opaque byte strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Payload {
    /// Phase 1a: the leader asks acceptors to promise ballot `ballot`.
    Prepare { ballot: Ballot, leader: ParticipantId },
    /// Phase 1b: an acceptor promises and reports its accepted record.
    Promise { ballot: Ballot, accepted: Accepted },
    /// Phase 2a: the leader asks acceptors to accept `value` at `ballot`.
    Propose {
        ballot: Ballot,
        value: Bytes,
        leader: ParticipantId,
    },
    /// Phase 2b: an acceptor voted for `value` at `ballot`.
    Accept { ballot: Ballot, value: Bytes },
    /// A quorum accepted `value`; learners may apply it.
    Decide { value: Bytes },
}

/// One addressed protocol message for one consensus instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Envelope {
    /// Consensus instance (= distributed log slot) this message belongs to.
    pub instance: u64,
    pub role: Role,
    pub payload: Payload,
}

impl Envelope {
    #[must_use]
    pub fn new(instance: u64, role: Role, payload: Payload) -> Self {
        Self {
            instance,
            role,
            payload,
        }
    }
}
