//! Shared participant registry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use error_stack::Report;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Unique participant name within one cluster.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(String);

impl ParticipantId {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    DuplicateName { name: ParticipantId },
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateName { name } => {
                write!(f, "participant name `{name}` already registered")
            }
        }
    }
}

impl std::error::Error for JoinError {}

type Routes<M> = Arc<RwLock<BTreeMap<ParticipantId, mpsc::Sender<M>>>>;

/// Name service plus in-process transport, generic over the message type.
///
/// Cheap to clone; all clones share the same routing table. The table lock
/// serializes join/leave/resolve.
pub struct Registry<M> {
    routes: Routes<M>,
}

impl<M> Default for Registry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for Registry<M> {
    fn clone(&self) -> Self {
        Self {
            routes: Arc::clone(&self.routes),
        }
    }
}

impl<M> Registry<M> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            routes: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Register under `name` and take ownership of the inbox.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::DuplicateName`] if the name is taken.
    pub fn join(
        &self,
        name: ParticipantId,
        capacity: usize,
    ) -> Result<Endpoint<M>, Report<JoinError>> {
        let mut routes = self.routes.write().expect("lock poisoned");
        if routes.contains_key(&name) {
            return Err(Report::new(JoinError::DuplicateName { name }));
        }
        let (tx, rx) = mpsc::channel(capacity);
        routes.insert(name.clone(), tx);
        trace!(%name, "participant joined");
        Ok(Endpoint {
            name,
            inbox: rx,
            registry: self.clone(),
        })
    }

    /// Remove a name. A no-op for unknown names.
    pub fn leave(&self, name: &ParticipantId) {
        let removed = self
            .routes
            .write()
            .expect("lock poisoned")
            .remove(name)
            .is_some();
        if removed {
            trace!(%name, "participant left");
        }
    }

    /// Look up the sending half registered under `name`.
    #[must_use]
    pub fn resolve(&self, name: &ParticipantId) -> Option<mpsc::Sender<M>> {
        self.routes.read().expect("lock poisoned").get(name).cloned()
    }

    /// All registered names, in order.
    #[must_use]
    pub fn participants(&self) -> Vec<ParticipantId> {
        self.routes
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Fire-and-forget send. Unknown recipients and full or closed inboxes
    /// drop the message.
    pub fn send_to(&self, name: &ParticipantId, message: M) {
        let Some(tx) = self.resolve(name) else {
            warn!(%name, "no such participant, dropping message");
            return;
        };
        if let Err(err) = tx.try_send(message) {
            warn!(%name, %err, "inbox unavailable, dropping message");
        }
    }

    /// [`send_to`](Self::send_to) every registered participant, self included.
    pub fn broadcast(&self, message: M)
    where
        M: Clone,
    {
        for name in self.participants() {
            self.send_to(&name, message.clone());
        }
    }
}

/// A participant's owned inbox. Leaves the registry on drop.
pub struct Endpoint<M> {
    name: ParticipantId,
    inbox: mpsc::Receiver<M>,
    registry: Registry<M>,
}

impl<M> Endpoint<M> {
    #[must_use]
    pub fn name(&self) -> &ParticipantId {
        &self.name
    }

    /// Receive the next message. `None` only after the endpoint has left the
    /// registry and every buffered message was drained.
    pub async fn recv(&mut self) -> Option<M> {
        self.inbox.recv().await
    }
}

impl<M> Drop for Endpoint<M> {
    fn drop(&mut self) {
        self.registry.leave(&self.name);
    }
}

impl<M> fmt::Debug for Endpoint<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint").field("name", &self.name).finish_non_exhaustive()
    }
}
