//! Participant naming and in-process message transport.
//!
//! A [`Registry`] is a shared name service: participants [`join`](Registry::join)
//! under a unique name and receive an [`Endpoint`] inbox; anyone holding the
//! registry can [`send_to`](Registry::send_to) a named participant or
//! [`broadcast`](Registry::broadcast) to all of them.
//!
//! Delivery is fair-lossy: sends to unknown names or full inboxes are logged
//! and dropped, never reported to the sender. Per-sender-per-recipient order
//! is preserved by the underlying channels; nothing is guaranteed across
//! senders.

#![warn(clippy::pedantic)]

mod registry;

pub use registry::{Endpoint, JoinError, ParticipantId, Registry};
