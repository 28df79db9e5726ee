//! The distributed log actor.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use bytes::Bytes;
use error_stack::{Report, ResultExt};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tandem_net::{Endpoint, Registry};
use tandem_paxos::{Decision, Processor, ProcessorHandle};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, instrument, trace, warn};

use crate::backoff::BackoffConfig;
use crate::storage::{LogEntry, StorageBackend, StorageError};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendError {
    /// Consensus did not decide the value within the retry budget.
    Exhausted { attempts: u32 },
    /// The backend rejected the decided entry; the append failed.
    Storage,
    /// The log actor is gone.
    Closed,
}

impl fmt::Display for AppendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted { attempts } => {
                write!(f, "append abandoned after {attempts} proposal attempts")
            }
            Self::Storage => f.write_str("append failed in the storage backend"),
            Self::Closed => f.write_str("log is shut down"),
        }
    }
}

impl std::error::Error for AppendError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    Storage,
    Closed,
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage => f.write_str("storage backend failure"),
            Self::Closed => f.write_str("log is shut down"),
        }
    }
}

impl std::error::Error for LogError {}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub backoff: BackoffConfig,
    /// Proposal attempts per append before giving up.
    pub max_attempts: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            max_attempts: 16,
        }
    }
}

type AppendReply = oneshot::Sender<Result<u64, Report<AppendError>>>;

enum Request {
    Append {
        value: Bytes,
        reply: AppendReply,
    },
    Latest {
        reply: oneshot::Sender<Result<Option<Bytes>, Report<LogError>>>,
    },
    Replay {
        from: Option<u64>,
        reply: oneshot::Sender<Result<Vec<Bytes>, Report<LogError>>>,
    },
    Subscribe {
        reply: oneshot::Sender<mpsc::Receiver<LogEntry>>,
    },
}

struct PendingAppend {
    value: Bytes,
    instance: u64,
    attempts: u32,
    deadline: Instant,
    reply: AppendReply,
}

/// Cloneable client handle to a running [`DistributedLog`].
#[derive(Debug, Clone)]
pub struct LogHandle {
    requests: mpsc::Sender<Request>,
}

impl LogHandle {
    /// Submit a value to consensus and wait for it to land in the log.
    ///
    /// Returns the sequence the value was appended at. Concurrent appends
    /// from other replicas may claim earlier slots; the log keeps
    /// re-proposing at the next free slot until the value is decided.
    ///
    /// # Errors
    ///
    /// [`AppendError::Exhausted`] when the retry budget runs out,
    /// [`AppendError::Storage`] when the backend rejects the decided entry,
    /// [`AppendError::Closed`] when the log actor is gone.
    pub async fn append(&self, value: Bytes) -> Result<u64, Report<AppendError>> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Append { value, reply: tx })
            .await
            .map_err(|_| Report::new(AppendError::Closed))?;
        rx.await.map_err(|_| Report::new(AppendError::Closed))?
    }

    /// The most recently appended value, `None` on an empty log.
    ///
    /// # Errors
    ///
    /// [`LogError::Storage`] or [`LogError::Closed`].
    pub async fn latest(&self) -> Result<Option<Bytes>, Report<LogError>> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Latest { reply: tx })
            .await
            .map_err(|_| Report::new(LogError::Closed))?;
        rx.await.map_err(|_| Report::new(LogError::Closed))?
    }

    /// All appended values with `seq >= from` (everything for `None`), in
    /// append order.
    ///
    /// # Errors
    ///
    /// [`LogError::Storage`] or [`LogError::Closed`].
    pub async fn replay(&self, from: Option<u64>) -> Result<Vec<Bytes>, Report<LogError>> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Replay { from, reply: tx })
            .await
            .map_err(|_| Report::new(LogError::Closed))?;
        rx.await.map_err(|_| Report::new(LogError::Closed))?
    }

    /// Subscribe to this replica's log: entries already appended are
    /// replayed into the channel first, then live entries follow, gapless
    /// and in order.
    ///
    /// # Errors
    ///
    /// [`LogError::Closed`].
    pub async fn subscribe(&self) -> Result<mpsc::Receiver<LogEntry>, Report<LogError>> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Subscribe { reply: tx })
            .await
            .map_err(|_| Report::new(LogError::Closed))?;
        rx.await.map_err(|_| Report::new(LogError::Closed))
    }
}

/// Append-only log of decided commands.
///
/// Writes happen only in the decision delivery path, so local entry order
/// equals global decision order. Decisions for future slots are buffered
/// until the sequence is dense.
pub struct DistributedLog<B> {
    backend: B,
    processor: ProcessorHandle,
    decisions: mpsc::Receiver<Decision>,
    requests: mpsc::Receiver<Request>,
    subscribers: Vec<mpsc::Sender<LogEntry>>,
    /// Decided but not yet appendable (out-of-order) values.
    ready: BTreeMap<u64, Bytes>,
    next_seq: u64,
    pending: Option<PendingAppend>,
    waiting: VecDeque<(Bytes, AppendReply)>,
    config: LogConfig,
    rng: StdRng,
}

impl<B: StorageBackend> DistributedLog<B> {
    /// Bring up the log over a joined endpoint.
    ///
    /// Spawns the participant's Paxos processor and the log actor; the
    /// handle is the only way to talk to either.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend cannot report its latest
    /// entry at startup.
    pub fn start(
        backend: B,
        registry: Registry<Bytes>,
        endpoint: Endpoint<Bytes>,
        total_participants: usize,
        config: LogConfig,
    ) -> Result<LogHandle, Report<StorageError>> {
        let next_seq = backend.latest()?.map_or(0, |entry| entry.seq + 1);
        let (processor, handle, decisions) = Processor::new(registry, endpoint, total_participants);
        tokio::spawn(processor.run());

        let (requests_tx, requests_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let actor = Self {
            backend,
            processor: handle,
            decisions,
            requests: requests_rx,
            subscribers: Vec::new(),
            ready: BTreeMap::new(),
            next_seq,
            pending: None,
            waiting: VecDeque::new(),
            config,
            rng: StdRng::from_os_rng(),
        };
        tokio::spawn(actor.run());

        Ok(LogHandle {
            requests: requests_tx,
        })
    }

    #[instrument(skip_all, name = "log", fields(next_seq = self.next_seq))]
    async fn run(mut self) {
        debug!("log started");
        loop {
            let deadline = self.pending.as_ref().map(|p| p.deadline);
            tokio::select! {
                request = self.requests.recv() => {
                    let Some(request) = request else { break };
                    self.handle_request(request).await;
                }
                decision = self.decisions.recv() => {
                    let Some(decision) = decision else { break };
                    self.handle_decision(decision).await;
                }
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.retry_pending().await;
                }
            }
        }
        debug!("log shutting down");
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Append { value, reply } => {
                if self.pending.is_some() {
                    trace!("append queued behind in-flight proposal");
                    self.waiting.push_back((value, reply));
                } else {
                    self.begin_append(value, reply).await;
                }
            }
            Request::Latest { reply } => {
                let result = self
                    .backend
                    .latest()
                    .map(|entry| entry.map(|e| e.value))
                    .change_context(LogError::Storage);
                let _ = reply.send(result);
            }
            Request::Replay { from, reply } => {
                let result = self
                    .backend
                    .all(from)
                    .map(|entries| entries.into_iter().map(|e| e.value).collect())
                    .change_context(LogError::Storage);
                let _ = reply.send(result);
            }
            Request::Subscribe { reply } => {
                let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
                if reply.send(rx).is_err() {
                    return;
                }
                // Hand over the backlog before registering for live entries;
                // nothing can be appended in between because this handler
                // runs to completion first.
                match self.backend.all(None) {
                    Ok(entries) => {
                        for entry in entries {
                            if tx.send(entry).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        warn!(?err, "failed to read backlog for subscriber");
                        return;
                    }
                }
                self.subscribers.push(tx);
            }
        }
    }

    async fn begin_append(&mut self, value: Bytes, reply: AppendReply) {
        let instance = self.next_seq;
        debug!(instance, "proposing append");
        self.processor.propose(instance, value.clone()).await;
        self.processor.start_ballot().await;
        let deadline = Instant::now() + self.config.backoff.duration(0, &mut self.rng);
        self.pending = Some(PendingAppend {
            value,
            instance,
            attempts: 1,
            deadline,
            reply,
        });
    }

    async fn handle_decision(&mut self, decision: Decision) {
        if decision.instance < self.next_seq {
            trace!(instance = decision.instance, "decision for filled slot ignored");
            return;
        }
        self.ready.insert(decision.instance, decision.value);
        self.drain_ready().await;
    }

    /// Append buffered decisions while the sequence stays dense.
    async fn drain_ready(&mut self) {
        while let Some(value) = self.ready.remove(&self.next_seq) {
            let entry = LogEntry {
                seq: self.next_seq,
                value,
            };
            if let Err(err) = self.backend.write(&entry) {
                warn!(?err, seq = entry.seq, "backend write failed");
                if let Some(pending) = self.pending.take() {
                    let _ = pending.reply.send(Err(Report::new(AppendError::Storage)));
                }
                return;
            }
            trace!(seq = entry.seq, "entry appended");
            self.next_seq += 1;
            self.notify_subscribers(&entry).await;
            self.settle_pending(&entry).await;
        }
    }

    async fn notify_subscribers(&mut self, entry: &LogEntry) {
        let mut open = Vec::with_capacity(self.subscribers.len());
        for tx in self.subscribers.drain(..) {
            if tx.send(entry.clone()).await.is_ok() {
                open.push(tx);
            }
        }
        self.subscribers = open;
    }

    /// Resolve the in-flight append against a freshly filled slot.
    async fn settle_pending(&mut self, entry: &LogEntry) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        if pending.instance != entry.seq {
            self.pending = Some(pending);
            return;
        }
        if pending.value == entry.value {
            debug!(seq = entry.seq, "append decided");
            let _ = pending.reply.send(Ok(entry.seq));
            self.start_next_waiting().await;
        } else {
            debug!(seq = entry.seq, "slot taken by a competing value, re-proposing");
            self.repropose(pending).await;
        }
    }

    async fn retry_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        trace!(
            instance = pending.instance,
            attempts = pending.attempts,
            "append timed out, retrying with a fresh ballot"
        );
        self.repropose(pending).await;
    }

    async fn repropose(&mut self, mut pending: PendingAppend) {
        if pending.attempts >= self.config.max_attempts {
            warn!(attempts = pending.attempts, "giving up on append");
            let _ = pending.reply.send(Err(Report::new(AppendError::Exhausted {
                attempts: pending.attempts,
            })));
            self.start_next_waiting().await;
            return;
        }
        pending.instance = self.next_seq;
        pending.attempts += 1;
        self.processor
            .propose(pending.instance, pending.value.clone())
            .await;
        self.processor.start_ballot().await;
        pending.deadline =
            Instant::now() + self.config.backoff.duration(pending.attempts, &mut self.rng);
        self.pending = Some(pending);
    }

    async fn start_next_waiting(&mut self) {
        if let Some((value, reply)) = self.waiting.pop_front() {
            self.begin_append(value, reply).await;
        }
    }
}
