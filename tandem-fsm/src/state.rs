//! User-declared states and their behavioral hooks.

use std::fmt;

/// What a state's transition hook decided for one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Move to the named state.
    Goto(String),
    /// Reject the input. The machine stays where it is; rejection is a
    /// value, not a failure.
    Reject,
}

pub(crate) type TransitionFn<I, C> = Box<dyn Fn(&I, &C) -> Verdict + Send + Sync>;
pub(crate) type OutputFn<I, C> = Box<dyn Fn(&I, &C) -> I + Send + Sync>;

/// One state of a [`Machine`](crate::Machine).
///
/// A state carries the set of directly reachable state names (`to`), an
/// ordered list of child states (`substates`, the first being the entry
/// substate), and two hooks: `transition` picks the next state for an input
/// and `output` computes the value the event reports (and feeds into
/// hierarchical descent).
///
/// A state with a non-empty substate list is *composite*: transitions
/// targeting it implicitly descend into its entry substate.
pub struct State<I, C> {
    pub(crate) name: String,
    pub(crate) to: Vec<String>,
    pub(crate) substates: Vec<String>,
    pub(crate) transition: TransitionFn<I, C>,
    pub(crate) output: OutputFn<I, C>,
}

impl<I, C> State<I, C> {
    /// Declare a state with its transition and output hooks.
    ///
    /// Hooks receive the input and the machine context by reference; the
    /// context is read-only so that replaying the same inputs yields the
    /// same trajectory on every replica.
    pub fn new<T, O>(name: impl Into<String>, transition: T, output: O) -> Self
    where
        T: Fn(&I, &C) -> Verdict + Send + Sync + 'static,
        O: Fn(&I, &C) -> I + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            to: Vec::new(),
            substates: Vec::new(),
            transition: Box::new(transition),
            output: Box::new(output),
        }
    }

    /// Set the names of the directly reachable states.
    #[must_use]
    pub fn to<S: Into<String>>(mut self, targets: impl IntoIterator<Item = S>) -> Self {
        self.to = targets.into_iter().map(Into::into).collect();
        self
    }

    /// Set the ordered child states. The first entry is the entry substate.
    #[must_use]
    pub fn substates<S: Into<String>>(mut self, children: impl IntoIterator<Item = S>) -> Self {
        self.substates = children.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this state has substates.
    #[must_use]
    pub fn is_composite(&self) -> bool {
        !self.substates.is_empty()
    }

    /// The default leaf reached when a transition targets this state.
    pub(crate) fn entry_substate(&self) -> Option<&str> {
        self.substates.first().map(String::as_str)
    }
}

impl<I, C> fmt::Debug for State<I, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("name", &self.name)
            .field("to", &self.to)
            .field("substates", &self.substates)
            .finish_non_exhaustive()
    }
}
