//! The operator actor: current state plus serialized input application.

use std::fmt;

use error_stack::Report;
use tandem_fsm::{Event, EventError, Machine};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    UnknownStartState { state: String },
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownStartState { state } => {
                write!(f, "start state `{state}` is not declared on the machine")
            }
        }
    }
}

impl std::error::Error for StartError {}

/// The operator actor is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorClosed;

impl fmt::Display for OperatorClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operator is shut down")
    }
}

impl std::error::Error for OperatorClosed {}

/// Why an input did not advance the machine. The current state is unchanged
/// in every case.
#[derive(Debug)]
pub enum InputError<I> {
    /// The current state's transition hook rejected the input.
    Rejected { state: String, input: I },
    /// The machine raised a definition error.
    Machine(Report<EventError>),
    /// The operator actor is gone.
    Closed,
}

impl<I> fmt::Display for InputError<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { state, .. } => write!(f, "input rejected in state `{state}`"),
            Self::Machine(report) => write!(f, "machine error: {}", report.current_context()),
            Self::Closed => fmt::Display::fmt(&OperatorClosed, f),
        }
    }
}

impl<I: fmt::Debug> std::error::Error for InputError<I> {}

enum Request<I> {
    Input {
        value: I,
        reply: oneshot::Sender<Result<(String, I), InputError<I>>>,
    },
    CurrentState {
        reply: oneshot::Sender<String>,
    },
}

/// Cloneable handle to a running [`Operator`].
#[derive(Debug)]
pub struct OperatorHandle<I> {
    requests: mpsc::Sender<Request<I>>,
}

impl<I> Clone for OperatorHandle<I> {
    fn clone(&self) -> Self {
        Self {
            requests: self.requests.clone(),
        }
    }
}

impl<I: Send> OperatorHandle<I> {
    /// The machine's current leaf state.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorClosed`] when the actor is gone.
    pub async fn current_state(&self) -> Result<String, OperatorClosed> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::CurrentState { reply: tx })
            .await
            .map_err(|_| OperatorClosed)?;
        rx.await.map_err(|_| OperatorClosed)
    }

    /// Apply one input at the current state.
    ///
    /// The read-event-update cycle is atomic: the actor serializes inputs in
    /// arrival order, and `current_state` moves to the returned leaf before
    /// the reply is sent.
    ///
    /// # Errors
    ///
    /// Returns [`InputError`]; the current state is unchanged on error.
    pub async fn input(&self, value: I) -> Result<(String, I), InputError<I>> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Input { value, reply: tx })
            .await
            .map_err(|_| InputError::Closed)?;
        rx.await.map_err(|_| InputError::Closed)?
    }
}

/// Single-participant wrapper that remembers the current state and mediates
/// inputs into the machine.
pub struct Operator<I, C> {
    machine: Machine<I, C>,
    current: String,
    requests: mpsc::Receiver<Request<I>>,
}

impl<I, C> Operator<I, C>
where
    I: Send + 'static,
    C: Send + 'static,
{
    /// Start the operator over a machine at the given start state.
    ///
    /// # Errors
    ///
    /// Returns [`StartError::UnknownStartState`] if the machine does not
    /// declare `start_state`.
    pub fn start(
        machine: Machine<I, C>,
        start_state: &str,
    ) -> Result<OperatorHandle<I>, Report<StartError>> {
        if !machine.has_state(start_state) {
            return Err(Report::new(StartError::UnknownStartState {
                state: start_state.to_owned(),
            }));
        }
        let (requests_tx, requests_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let actor = Self {
            machine,
            current: start_state.to_owned(),
            requests: requests_rx,
        };
        tokio::spawn(actor.run());
        Ok(OperatorHandle {
            requests: requests_tx,
        })
    }

    #[instrument(skip_all, name = "operator", fields(machine = %self.machine.name()))]
    async fn run(mut self) {
        debug!(start = %self.current, "operator started");
        while let Some(request) = self.requests.recv().await {
            match request {
                Request::CurrentState { reply } => {
                    let _ = reply.send(self.current.clone());
                }
                Request::Input { value, reply } => {
                    let _ = reply.send(self.apply(value));
                }
            }
        }
        debug!("operator shutting down");
    }

    fn apply(&mut self, input: I) -> Result<(String, I), InputError<I>> {
        match self.machine.event(&self.current, input) {
            Ok(Event::Transitioned { state, output }) => {
                debug!(from = %self.current, to = %state, "state advanced");
                self.current = state.clone();
                Ok((state, output))
            }
            Ok(Event::Rejected { state, input }) => Err(InputError::Rejected { state, input }),
            Err(report) => Err(InputError::Machine(report)),
        }
    }
}
