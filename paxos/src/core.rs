//! Pure protocol cores. No I/O, no async.
//!
//! The acceptor and leader state transitions live here so unit tests and the
//! model checker exercise exactly the code the [`Processor`](crate::Processor)
//! runs. Methods take an inbound payload's fields and return the envelope to
//! send, if any; silence is how Paxos ignores stale ballots.

use std::collections::BTreeMap;

use bytes::Bytes;
use tandem_net::ParticipantId;
use tracing::trace;

use crate::ballot::{Accepted, Ballot};
use crate::messages::{Envelope, Payload, Role};

/// Acceptor role: per-instance promise and vote bookkeeping.
///
/// An instance's promised ballot is non-decreasing: prepares and proposes
/// below it are ignored, which is the whole of Paxos safety on this side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AcceptorCore {
    pid: ParticipantId,
    promised: BTreeMap<u64, Ballot>,
    accepted: BTreeMap<u64, Accepted>,
}

impl AcceptorCore {
    #[must_use]
    pub fn new(pid: ParticipantId) -> Self {
        Self {
            pid,
            promised: BTreeMap::new(),
            accepted: BTreeMap::new(),
        }
    }

    /// Phase 1b: promise `ballot` unless a higher one was already promised.
    ///
    /// Returns the promise envelope to send back to the leader, reporting
    /// this instance's accepted record (unset if the acceptor never voted).
    pub fn prepare(&mut self, instance: u64, ballot: Ballot) -> Option<Envelope> {
        if self.dominated(instance, &ballot) {
            trace!(instance, %ballot, "ignoring prepare below promised ballot");
            return None;
        }
        self.promised.insert(instance, ballot.clone());
        let accepted = self
            .accepted
            .get(&instance)
            .cloned()
            .unwrap_or_else(|| Accepted::unset(self.pid.clone()));
        Some(Envelope::new(
            instance,
            Role::ToLeader,
            Payload::Promise { ballot, accepted },
        ))
    }

    /// Phase 2b: vote for `value` at `ballot` unless a higher ballot was
    /// promised since.
    pub fn propose(&mut self, instance: u64, ballot: Ballot, value: Bytes) -> Option<Envelope> {
        if self.dominated(instance, &ballot) {
            trace!(instance, %ballot, "ignoring propose below promised ballot");
            return None;
        }
        self.promised.insert(instance, ballot.clone());
        self.accepted.insert(
            instance,
            Accepted {
                value: Some(value.clone()),
                ballot: ballot.clone(),
            },
        );
        Some(Envelope::new(
            instance,
            Role::ToLeader,
            Payload::Accept { ballot, value },
        ))
    }

    fn dominated(&self, instance: u64, ballot: &Ballot) -> bool {
        self.promised
            .get(&instance)
            .is_some_and(|current| ballot < current)
    }

    /// The highest ballot promised for an instance, if any.
    #[must_use]
    pub fn promised(&self, instance: u64) -> Option<&Ballot> {
        self.promised.get(&instance)
    }

    /// The accepted record for an instance, if the acceptor ever voted.
    #[must_use]
    pub fn last_accepted(&self, instance: u64) -> Option<&Accepted> {
        self.accepted.get(&instance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Preparing,
    Accepting,
}

#[derive(Debug, Clone)]
struct Round {
    instance: u64,
    ballot: Ballot,
    phase: Phase,
    promises: Vec<Accepted>,
    accepts: Vec<Bytes>,
}

/// Leader (distinguished proposer) role: drives one instance at a time.
///
/// The caller sets a pending value, starts a ballot, and feeds promise and
/// accept responses back in; quorum checks run after each append. Only
/// responses carrying the active round's ballot are counted, so a preempted
/// round's stragglers cannot trip a later quorum.
#[derive(Debug, Clone)]
pub struct LeaderCore {
    pid: ParticipantId,
    total_participants: usize,
    latest_known_ballot: Ballot,
    pending: Option<(u64, Bytes)>,
    round: Option<Round>,
}

impl LeaderCore {
    #[must_use]
    pub fn new(pid: ParticipantId, total_participants: usize) -> Self {
        Self {
            latest_known_ballot: Ballot::zero(pid.clone()),
            pid,
            total_participants,
            pending: None,
            round: None,
        }
    }

    /// Strict majority of the participant set.
    #[must_use]
    pub fn quorum(&self) -> usize {
        self.total_participants / 2 + 1
    }

    /// Set the value to drive through the given instance. Clears any round
    /// in flight.
    pub fn set_value(&mut self, instance: u64, value: Bytes) {
        self.pending = Some((instance, value));
        self.round = None;
    }

    /// Begin a prepare phase with a strictly higher ballot.
    ///
    /// Returns the prepare envelope to broadcast to acceptors, or `None`
    /// when no value is pending.
    pub fn start_ballot(&mut self) -> Option<Envelope> {
        let Some((instance, _)) = self.pending else {
            trace!("start_ballot with no pending value");
            return None;
        };
        let ballot = self.latest_known_ballot.increase(self.pid.clone());
        self.latest_known_ballot = ballot.clone();
        self.round = Some(Round {
            instance,
            ballot: ballot.clone(),
            phase: Phase::Preparing,
            promises: Vec::new(),
            accepts: Vec::new(),
        });
        trace!(instance, %ballot, "starting ballot");
        Some(Envelope::new(
            instance,
            Role::ToAcceptors,
            Payload::Prepare {
                ballot,
                leader: self.pid.clone(),
            },
        ))
    }

    /// Count one promise. On quorum, returns the propose envelope to
    /// broadcast, carrying the highest previously accepted value if any
    /// promise reported one, else the pending value.
    pub fn handle_promise(
        &mut self,
        instance: u64,
        ballot: &Ballot,
        accepted: Accepted,
    ) -> Option<Envelope> {
        let quorum = self.quorum();
        let pid = self.pid.clone();
        let pending = self.pending.clone();

        let round = self.round.as_mut()?;
        if round.phase != Phase::Preparing || round.instance != instance || round.ballot != *ballot
        {
            trace!(instance, %ballot, "ignoring stale promise");
            return None;
        }

        round.promises.push(accepted);
        if round.promises.len() < quorum {
            return None;
        }

        // Paxos P2c: adopt the value accepted at the highest ballot; full
        // (number, pid) order breaks number ties.
        let adopted = round
            .promises
            .iter()
            .filter(|record| record.value.is_some())
            .max_by(|a, b| a.ballot.cmp(&b.ballot))
            .and_then(|record| record.value.clone());
        let value = match adopted {
            Some(value) => value,
            None => {
                let (pending_instance, value) = pending?;
                if pending_instance != instance {
                    return None;
                }
                value
            }
        };

        round.promises.clear();
        round.phase = Phase::Accepting;
        trace!(instance, ballot = %round.ballot, "prepare quorum reached, proposing");
        Some(Envelope::new(
            instance,
            Role::ToAcceptors,
            Payload::Propose {
                ballot: round.ballot.clone(),
                value,
                leader: pid,
            },
        ))
    }

    /// Count one accept vote. On quorum, ends the round and returns the
    /// decide envelope to broadcast to learners.
    pub fn handle_accept(
        &mut self,
        instance: u64,
        ballot: &Ballot,
        value: Bytes,
    ) -> Option<Envelope> {
        let quorum = self.quorum();

        let round = self.round.as_mut()?;
        if round.phase != Phase::Accepting || round.instance != instance || round.ballot != *ballot
        {
            trace!(instance, %ballot, "ignoring stale accept");
            return None;
        }

        round.accepts.push(value.clone());
        if round.accepts.len() < quorum {
            return None;
        }

        self.round = None;
        if self
            .pending
            .as_ref()
            .is_some_and(|(pending_instance, _)| *pending_instance == instance)
        {
            self.pending = None;
        }
        trace!(instance, %ballot, "accept quorum reached, deciding");
        Some(Envelope::new(
            instance,
            Role::ToLearners,
            Payload::Decide { value },
        ))
    }

    /// The highest ballot this leader has issued or observed.
    #[must_use]
    pub fn latest_known_ballot(&self) -> &Ballot {
        &self.latest_known_ballot
    }

    /// Whether no round is in flight.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.round.is_none()
    }
}
