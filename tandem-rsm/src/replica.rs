//! Per-replica composition.

use std::fmt;

use bytes::Bytes;
use error_stack::{Report, ResultExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tandem_fsm::Machine;
use tandem_log::{DistributedLog, LogConfig, LogHandle, MemoryBackend, StorageBackend};
use tandem_net::{ParticipantId, Registry};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::operator::{Operator, OperatorHandle};

const ENDPOINT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaError {
    /// Joining the network failed (usually a duplicate name).
    Network,
    /// The storage backend failed at startup.
    Storage,
    /// A command could not be encoded for the wire.
    Codec,
    /// The distributed log refused or lost the submission.
    Log,
    /// The operator failed to start or is gone.
    Operator,
}

impl fmt::Display for ReplicaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => f.write_str("failed to join the participant registry"),
            Self::Storage => f.write_str("storage backend failed"),
            Self::Codec => f.write_str("failed to encode command"),
            Self::Log => f.write_str("distributed log operation failed"),
            Self::Operator => f.write_str("operator unavailable"),
        }
    }
}

impl std::error::Error for ReplicaError {}

/// Per-replica settings.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Unique name within the cluster.
    pub name: ParticipantId,
    /// Cluster size; fixes the Paxos quorum.
    pub total_participants: usize,
    pub log: LogConfig,
}

impl ReplicaConfig {
    #[must_use]
    pub fn new(name: impl Into<ParticipantId>, total_participants: usize) -> Self {
        Self {
            name: name.into(),
            total_participants,
            log: LogConfig::default(),
        }
    }
}

/// One participant's full stack: network endpoint, Paxos processor,
/// distributed log, and operator.
///
/// Commands are the machine's input type, serialized with postcard for the
/// log. [`submit`](Self::submit) proposes a command through consensus;
/// whichever replica proposed it, every replica's operator consumes the same
/// decided sequence and applies identical transitions.
#[derive(Debug)]
pub struct Replica<I> {
    name: ParticipantId,
    log: LogHandle,
    operator: OperatorHandle<I>,
}

impl<I> Replica<I>
where
    I: Serialize + DeserializeOwned + Clone + Send + fmt::Debug + 'static,
{
    /// Start a replica with an in-memory log backend.
    ///
    /// # Errors
    ///
    /// See [`start_with_backend`](Self::start_with_backend).
    pub async fn start<C: Send + 'static>(
        registry: Registry<Bytes>,
        machine: Machine<I, C>,
        start_state: &str,
        config: ReplicaConfig,
    ) -> Result<Self, Report<ReplicaError>> {
        Self::start_with_backend(MemoryBackend::new(), registry, machine, start_state, config).await
    }

    /// Start a replica over an explicit storage backend.
    ///
    /// Joins the registry under the replica's name, brings up the Paxos
    /// processor and the log, starts the operator at `start_state`, and
    /// subscribes the operator to log deliveries.
    ///
    /// # Errors
    ///
    /// [`ReplicaError::Network`] when the name is taken,
    /// [`ReplicaError::Storage`] when the backend fails at startup,
    /// [`ReplicaError::Operator`] when the start state is undeclared.
    pub async fn start_with_backend<B, C>(
        backend: B,
        registry: Registry<Bytes>,
        machine: Machine<I, C>,
        start_state: &str,
        config: ReplicaConfig,
    ) -> Result<Self, Report<ReplicaError>>
    where
        B: StorageBackend,
        C: Send + 'static,
    {
        let endpoint = registry
            .join(config.name.clone(), ENDPOINT_CAPACITY)
            .change_context(ReplicaError::Network)?;

        let log = DistributedLog::start(
            backend,
            registry,
            endpoint,
            config.total_participants,
            config.log.clone(),
        )
        .change_context(ReplicaError::Storage)?;

        let operator =
            Operator::start(machine, start_state).change_context(ReplicaError::Operator)?;

        let entries = log.subscribe().await.change_context(ReplicaError::Log)?;
        tokio::spawn(pump(config.name.clone(), entries, operator.clone()));

        debug!(name = %config.name, "replica started");
        Ok(Self {
            name: config.name,
            log,
            operator,
        })
    }

    /// Submit a command to the cluster. Returns its log sequence.
    ///
    /// # Errors
    ///
    /// [`ReplicaError::Codec`] when the command cannot be serialized,
    /// [`ReplicaError::Log`] when consensus gives up or the log is down.
    pub async fn submit(&self, command: &I) -> Result<u64, Report<ReplicaError>> {
        let bytes = postcard::to_allocvec(command)
            .map_err(|e| Report::new(ReplicaError::Codec).attach(e.to_string()))?;
        self.log
            .append(Bytes::from(bytes))
            .await
            .change_context(ReplicaError::Log)
    }

    /// The operator's current leaf state.
    ///
    /// # Errors
    ///
    /// [`ReplicaError::Operator`] when the operator is gone.
    pub async fn current_state(&self) -> Result<String, Report<ReplicaError>> {
        self.operator
            .current_state()
            .await
            .change_context(ReplicaError::Operator)
    }

    #[must_use]
    pub fn name(&self) -> &ParticipantId {
        &self.name
    }

    /// Direct access to the log (latest, replay).
    #[must_use]
    pub fn log(&self) -> &LogHandle {
        &self.log
    }

    /// Direct access to the operator.
    #[must_use]
    pub fn operator(&self) -> &OperatorHandle<I> {
        &self.operator
    }
}

/// Feed decided commands into the operator in decision order.
async fn pump<I>(
    name: ParticipantId,
    mut entries: mpsc::Receiver<tandem_log::LogEntry>,
    operator: OperatorHandle<I>,
) where
    I: DeserializeOwned + Send + fmt::Debug + 'static,
{
    while let Some(entry) = entries.recv().await {
        match postcard::from_bytes::<I>(&entry.value) {
            Ok(command) => match operator.input(command).await {
                Ok((state, _)) => {
                    trace!(replica = %name, seq = entry.seq, %state, "command applied");
                }
                Err(err) => {
                    // Rejections are deterministic: every replica skips the
                    // same command the same way.
                    debug!(replica = %name, seq = entry.seq, %err, "command not applied");
                }
            },
            Err(err) => {
                warn!(replica = %name, seq = entry.seq, %err, "dropping undecodable command");
            }
        }
    }
    trace!(replica = %name, "log subscription closed");
}
