//! Consensus-backed append-only log.
//!
//! A [`DistributedLog`] pairs a [`StorageBackend`] with a local Paxos
//! [`Processor`](tandem_paxos::Processor). Values submitted through
//! [`append`](LogHandle::append) go through consensus; decided values are
//! written to storage in decision order on every replica, so each replica's
//! log is a prefix of the same global sequence.

#![warn(clippy::pedantic)]

mod backoff;
mod log;
mod storage;

pub use backoff::BackoffConfig;
pub use log::{AppendError, DistributedLog, LogConfig, LogError, LogHandle};
pub use storage::{LogEntry, MemoryBackend, StorageBackend, StorageError};
