//! Replicated state machines.
//!
//! An [`Operator`] holds one machine's current leaf state and applies inputs
//! to it one at a time. A [`Replica`] composes the full per-participant
//! stack: a network endpoint, a Paxos processor, a distributed log, and an
//! operator fed from the log in decision order — so every replica applies
//! the same commands in the same order and walks the same trajectory.

#![warn(clippy::pedantic)]

mod operator;
mod replica;

pub use operator::{InputError, Operator, OperatorClosed, OperatorHandle, StartError};
pub use replica::{Replica, ReplicaConfig, ReplicaError};
