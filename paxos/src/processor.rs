//! Per-participant processor actor.
//!
//! Owns the colocated acceptor and leader cores, multiplexes inbound
//! envelopes by role tag, and forwards decisions to the upper process.

use std::collections::BTreeSet;

use bytes::Bytes;
use tandem_net::{Endpoint, ParticipantId, Registry};
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace, warn};

use crate::codec;
use crate::core::{AcceptorCore, LeaderCore};
use crate::messages::{Envelope, Payload, Role};

const CHANNEL_CAPACITY: usize = 64;

/// A decided value for one consensus instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub instance: u64,
    pub value: Bytes,
}

enum Command {
    Propose { instance: u64, value: Bytes },
    StartBallot,
}

/// Cloneable handle to a running [`Processor`].
///
/// Both operations are fire-and-forget: Paxos never reports failure to the
/// caller; lost proposals surface as absent decisions and are retried with a
/// fresh ballot.
#[derive(Clone)]
pub struct ProcessorHandle {
    commands: mpsc::Sender<Command>,
}

impl ProcessorHandle {
    /// Set the leader's pending value for `instance`.
    pub async fn propose(&self, instance: u64, value: Bytes) {
        let _ = self
            .commands
            .send(Command::Propose { instance, value })
            .await;
    }

    /// Begin a new prepare phase with a strictly higher ballot.
    pub async fn start_ballot(&self) {
        let _ = self.commands.send(Command::StartBallot).await;
    }
}

/// One participant's consensus endpoint: acceptor + leader + learner under a
/// single inbox.
pub struct Processor {
    name: ParticipantId,
    registry: Registry<Bytes>,
    endpoint: Endpoint<Bytes>,
    acceptor: AcceptorCore,
    leader: LeaderCore,
    delivered: BTreeSet<u64>,
    decisions: mpsc::Sender<Decision>,
    commands: mpsc::Receiver<Command>,
}

impl Processor {
    /// Build a processor over a joined endpoint.
    ///
    /// `total_participants` fixes the quorum size; every participant of the
    /// cluster must be counted whether or not it has joined yet.
    ///
    /// Returns the processor (to be `run`), its command handle, and the
    /// stream of decisions, delivered exactly once per instance.
    #[must_use]
    pub fn new(
        registry: Registry<Bytes>,
        endpoint: Endpoint<Bytes>,
        total_participants: usize,
    ) -> (Self, ProcessorHandle, mpsc::Receiver<Decision>) {
        let name = endpoint.name().clone();
        let (commands_tx, commands_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (decisions_tx, decisions_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let processor = Self {
            acceptor: AcceptorCore::new(name.clone()),
            leader: LeaderCore::new(name.clone(), total_participants),
            name,
            registry,
            endpoint,
            delivered: BTreeSet::new(),
            decisions: decisions_tx,
            commands: commands_rx,
        };
        (
            processor,
            ProcessorHandle {
                commands: commands_tx,
            },
            decisions_rx,
        )
    }

    /// Message loop. Runs until the command handle is dropped and the
    /// network endpoint closes.
    #[instrument(skip_all, name = "processor", fields(participant = %self.name))]
    pub async fn run(mut self) {
        debug!("processor started");
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command);
                }
                message = self.endpoint.recv() => {
                    let Some(bytes) = message else { break };
                    self.handle_message(&bytes).await;
                }
            }
        }
        debug!("processor shutting down");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Propose { instance, value } => {
                trace!(instance, "pending value set");
                self.leader.set_value(instance, value);
            }
            Command::StartBallot => {
                if let Some(prepare) = self.leader.start_ballot() {
                    self.broadcast(&prepare);
                }
            }
        }
    }

    async fn handle_message(&mut self, bytes: &[u8]) {
        let envelope = match codec::decode(bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(?err, "dropping undecodable message");
                return;
            }
        };
        match envelope.role {
            Role::ToAcceptors => self.handle_acceptor(envelope),
            Role::ToLeader => self.handle_leader(envelope),
            Role::ToLearners => self.handle_learner(envelope).await,
        }
    }

    fn handle_acceptor(&mut self, envelope: Envelope) {
        match envelope.payload {
            Payload::Prepare { ballot, leader } => {
                if let Some(reply) = self.acceptor.prepare(envelope.instance, ballot) {
                    self.send(&leader, &reply);
                }
            }
            Payload::Propose {
                ballot,
                value,
                leader,
            } => {
                if let Some(reply) = self.acceptor.propose(envelope.instance, ballot, value) {
                    self.send(&leader, &reply);
                }
            }
            other => trace!(?other, "payload not addressed to acceptors"),
        }
    }

    fn handle_leader(&mut self, envelope: Envelope) {
        match envelope.payload {
            Payload::Promise { ballot, accepted } => {
                if let Some(propose) = self.leader.handle_promise(envelope.instance, &ballot, accepted)
                {
                    self.broadcast(&propose);
                }
            }
            Payload::Accept { ballot, value } => {
                if let Some(decide) = self.leader.handle_accept(envelope.instance, &ballot, value) {
                    self.broadcast(&decide);
                }
            }
            other => trace!(?other, "payload not addressed to the leader"),
        }
    }

    async fn handle_learner(&mut self, envelope: Envelope) {
        let Payload::Decide { value } = envelope.payload else {
            trace!("payload not addressed to learners");
            return;
        };
        if !self.delivered.insert(envelope.instance) {
            trace!(instance = envelope.instance, "duplicate decide ignored");
            return;
        }
        debug!(instance = envelope.instance, "decision reached");
        let decision = Decision {
            instance: envelope.instance,
            value,
        };
        if self.decisions.send(decision).await.is_err() {
            warn!("decision receiver dropped");
        }
    }

    fn send(&self, to: &ParticipantId, envelope: &Envelope) {
        match codec::encode(envelope) {
            Ok(bytes) => self.registry.send_to(to, bytes),
            Err(err) => warn!(?err, "failed to encode envelope"),
        }
    }

    fn broadcast(&self, envelope: &Envelope) {
        match codec::encode(envelope) {
            Ok(bytes) => self.registry.broadcast(bytes),
            Err(err) => warn!(?err, "failed to encode envelope"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decide(instance: u64, value: &'static [u8]) -> Bytes {
        codec::encode(&Envelope::new(
            instance,
            Role::ToLearners,
            Payload::Decide {
                value: Bytes::from_static(value),
            },
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn duplicate_decide_is_delivered_once() {
        let registry: Registry<Bytes> = Registry::new();
        let endpoint = registry.join("p1".into(), CHANNEL_CAPACITY).unwrap();
        let (processor, _handle, mut decisions) = Processor::new(registry.clone(), endpoint, 1);
        tokio::spawn(processor.run());

        registry.send_to(&"p1".into(), decide(0, b"cmd"));
        registry.send_to(&"p1".into(), decide(0, b"cmd"));
        registry.send_to(&"p1".into(), decide(1, b"next"));

        let first = decisions.recv().await.unwrap();
        assert_eq!(first.instance, 0);
        assert_eq!(first.value, Bytes::from_static(b"cmd"));

        // The duplicate for instance 0 was swallowed; the next delivery is
        // instance 1.
        let second = decisions.recv().await.unwrap();
        assert_eq!(second.instance, 1);
    }

    #[tokio::test]
    async fn single_participant_cluster_decides_alone() {
        let registry: Registry<Bytes> = Registry::new();
        let endpoint = registry.join("solo".into(), CHANNEL_CAPACITY).unwrap();
        let (processor, handle, mut decisions) = Processor::new(registry.clone(), endpoint, 1);
        tokio::spawn(processor.run());

        handle.propose(0, Bytes::from_static(b"only")).await;
        handle.start_ballot().await;

        let decision = decisions.recv().await.unwrap();
        assert_eq!(decision.instance, 0);
        assert_eq!(decision.value, Bytes::from_static(b"only"));
    }

    #[tokio::test]
    async fn undecodable_messages_are_dropped() {
        let registry: Registry<Bytes> = Registry::new();
        let endpoint = registry.join("p1".into(), CHANNEL_CAPACITY).unwrap();
        let (processor, handle, mut decisions) = Processor::new(registry.clone(), endpoint, 1);
        tokio::spawn(processor.run());

        registry.send_to(&"p1".into(), Bytes::from_static(&[0xff; 8]));

        // The processor is still alive and able to decide.
        handle.propose(0, Bytes::from_static(b"after")).await;
        handle.start_ballot().await;
        let decision = decisions.recv().await.unwrap();
        assert_eq!(decision.value, Bytes::from_static(b"after"));
    }
}
