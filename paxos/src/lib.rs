//! Single-decree Paxos consensus.
//!
//! Every participant hosts three colocated roles under one [`Processor`]:
//! an acceptor, a leader (distinguished proposer), and a learner. One
//! *instance* of agreement decides one value; instances are numbered so a
//! distributed log can map instance `n` to log slot `n`.
//!
//! The protocol logic lives in pure, I/O-free cores ([`AcceptorCore`],
//! [`LeaderCore`]) so the exact state transitions can be exercised by unit
//! tests and the model checker; the [`Processor`] actor wires the cores to a
//! [`tandem_net::Registry`] transport and delivers decisions upward exactly
//! once per instance.
//!
//! # Quick Start
//!
//! ```ignore
//! let registry: Registry<Bytes> = Registry::new();
//! let endpoint = registry.join("p1".into(), 64)?;
//! let (processor, handle, mut decisions) = Processor::new(registry, endpoint, 3);
//! tokio::spawn(processor.run());
//!
//! handle.propose(0, Bytes::from_static(b"cmd")).await;
//! handle.start_ballot().await;
//! let decision = decisions.recv().await;
//! ```

#![warn(clippy::pedantic)]

mod ballot;
mod codec;
mod core;
mod messages;
mod processor;

pub use ballot::{Accepted, Ballot};
pub use codec::{EnvelopeCodec, WireError, decode, encode};
pub use core::{AcceptorCore, LeaderCore};
pub use messages::{Envelope, Payload, Role};
pub use processor::{Decision, Processor, ProcessorHandle};
