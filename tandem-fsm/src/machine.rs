//! Machine declaration, validation, and event application.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use error_stack::Report;
use tracing::trace;

use crate::routine::{Routine, RoutineError};
use crate::state::{State, Verdict};

/// Error found while validating a machine declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    DuplicateState { state: String },
    DuplicateRoutine { routine: String },
    UnknownTransitionTarget { state: String, target: String },
    UnknownSubstate { state: String, substate: String },
    UnknownRoutineStep { routine: String, step: String },
    EmptyRoutine { routine: String },
    /// Following entry substates from this state never reaches a leaf.
    EntryCycle { state: String },
}

impl fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateState { state } => write!(f, "state `{state}` declared twice"),
            Self::DuplicateRoutine { routine } => write!(f, "routine `{routine}` declared twice"),
            Self::UnknownTransitionTarget { state, target } => {
                write!(f, "state `{state}` lists undeclared transition target `{target}`")
            }
            Self::UnknownSubstate { state, substate } => {
                write!(f, "state `{state}` lists undeclared substate `{substate}`")
            }
            Self::UnknownRoutineStep { routine, step } => {
                write!(f, "routine `{routine}` lists undeclared state `{step}`")
            }
            Self::EmptyRoutine { routine } => write!(f, "routine `{routine}` has no steps"),
            Self::EntryCycle { state } => {
                write!(f, "entry substates of `{state}` form a cycle")
            }
        }
    }
}

impl std::error::Error for DefinitionError {}

/// Error raised while applying one event.
///
/// These indicate a bad call or a machine definition bug; a transition hook
/// rejecting its input is not an error and is reported as
/// [`Event::Rejected`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    NoSuchState {
        state: String,
    },
    /// The transition hook returned a target outside the allowed graph.
    InvalidTransition {
        from: String,
        to: String,
        allowed: Vec<String>,
    },
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchState { state } => write!(f, "no such state: `{state}`"),
            Self::InvalidTransition { from, to, allowed } => {
                write!(f, "invalid transition `{from}` -> `{to}` (allowed: {allowed:?})")
            }
        }
    }
}

impl std::error::Error for EventError {}

/// Result of one successful `event` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<I> {
    /// The machine moved to a leaf state and produced an output.
    Transitioned { state: String, output: I },
    /// The origin state's transition hook rejected the input.
    Rejected { state: String, input: I },
}

/// Declarative machine construction.
///
/// States and routines are collected first; [`build`](Self::build) validates
/// the whole declaration at once so definition bugs surface before any event
/// runs.
pub struct MachineBuilder<I, C> {
    name: String,
    ctx: C,
    states: Vec<State<I, C>>,
    routines: Vec<(String, Vec<String>)>,
}

impl<I, C> MachineBuilder<I, C> {
    pub fn new(name: impl Into<String>, ctx: C) -> Self {
        Self {
            name: name.into(),
            ctx,
            states: Vec::new(),
            routines: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(mut self, state: State<I, C>) -> Self {
        self.states.push(state);
        self
    }

    /// Declare a routine: a named, ordered script of expected state names.
    #[must_use]
    pub fn routine<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        steps: impl IntoIterator<Item = S>,
    ) -> Self {
        self.routines
            .push((name.into(), steps.into_iter().map(Into::into).collect()));
        self
    }

    /// Validate the declaration and derive the transition matrix.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] when a name is declared twice, a `to`
    /// list, substate list, or routine references an undeclared state, a
    /// routine is empty, or entry substates form a cycle.
    pub fn build(self) -> Result<Machine<I, C>, Report<DefinitionError>> {
        let mut states = BTreeMap::new();
        for state in self.states {
            let name = state.name.clone();
            if states.insert(name.clone(), state).is_some() {
                return Err(Report::new(DefinitionError::DuplicateState { state: name }));
            }
        }

        for state in states.values() {
            for target in &state.to {
                if !states.contains_key(target) {
                    return Err(Report::new(DefinitionError::UnknownTransitionTarget {
                        state: state.name.clone(),
                        target: target.clone(),
                    }));
                }
            }
            for substate in &state.substates {
                if !states.contains_key(substate) {
                    return Err(Report::new(DefinitionError::UnknownSubstate {
                        state: state.name.clone(),
                        substate: substate.clone(),
                    }));
                }
            }
        }

        // Hierarchical descent must terminate: walk each entry chain.
        for state in states.values() {
            let mut seen = BTreeSet::new();
            let mut current = &state.name;
            while let Some(entry) = states[current.as_str()].entry_substate() {
                if !seen.insert(entry.to_owned()) {
                    return Err(Report::new(DefinitionError::EntryCycle {
                        state: state.name.clone(),
                    }));
                }
                current = &states[entry].name;
            }
        }

        let mut routines = BTreeMap::new();
        for (name, steps) in self.routines {
            if steps.is_empty() {
                return Err(Report::new(DefinitionError::EmptyRoutine { routine: name }));
            }
            for step in &steps {
                if !states.contains_key(step) {
                    return Err(Report::new(DefinitionError::UnknownRoutineStep {
                        routine: name.clone(),
                        step: step.clone(),
                    }));
                }
            }
            if routines.insert(name.clone(), steps).is_some() {
                return Err(Report::new(DefinitionError::DuplicateRoutine { routine: name }));
            }
        }

        // Per-state candidate targets: entry substates of composite targets
        // first, then the declared `to` list.
        let matrix = states
            .values()
            .map(|state| {
                let mut candidates: Vec<String> = state
                    .to
                    .iter()
                    .filter_map(|target| states[target.as_str()].entry_substate())
                    .map(ToOwned::to_owned)
                    .collect();
                candidates.extend(state.to.iter().cloned());
                (state.name.clone(), candidates)
            })
            .collect();

        Ok(Machine {
            name: self.name,
            ctx: self.ctx,
            states,
            routines,
            matrix,
        })
    }
}

/// A validated machine: the state graph, declared routines, and the
/// user-supplied context handed to every hook.
pub struct Machine<I, C> {
    name: String,
    ctx: C,
    states: BTreeMap<String, State<I, C>>,
    routines: BTreeMap<String, Vec<String>>,
    matrix: BTreeMap<String, Vec<String>>,
}

impl<I, C> Machine<I, C> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn context(&self) -> &C {
        &self.ctx
    }

    /// Replace the context. The context must stay identical across replicas
    /// replaying the same log.
    pub fn set_context(&mut self, ctx: C) {
        self.ctx = ctx;
    }

    /// Candidate targets for one state, entry substates first.
    #[must_use]
    pub fn allowed_from(&self, state: &str) -> Option<&[String]> {
        self.matrix.get(state).map(Vec::as_slice)
    }

    /// Whether `state` is declared on this machine.
    #[must_use]
    pub fn has_state(&self, state: &str) -> bool {
        self.states.contains_key(state)
    }

    /// Apply one transition step from `from` with `input`.
    ///
    /// Runs the state's transition hook; a rejected input comes back as
    /// [`Event::Rejected`]. An accepted input is validated against the
    /// transition matrix, the output is computed, and if the target is
    /// composite the event descends into its entry substate with the output
    /// as the new input. The returned leaf is the event's result, so callers
    /// only ever observe leaf states.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::NoSuchState`] for an undeclared `from`, and
    /// [`EventError::InvalidTransition`] when the hook targets a state
    /// outside the allowed graph.
    pub fn event(&self, from: &str, input: I) -> Result<Event<I>, Report<EventError>> {
        let state = self.states.get(from).ok_or_else(|| {
            Report::new(EventError::NoSuchState {
                state: from.to_owned(),
            })
        })?;

        let next = match (state.transition)(&input, &self.ctx) {
            Verdict::Reject => {
                trace!(machine = %self.name, state = %from, "input rejected");
                return Ok(Event::Rejected {
                    state: state.name.clone(),
                    input,
                });
            }
            Verdict::Goto(next) => next,
        };

        if !self.matrix[from].contains(&next) {
            return Err(Report::new(EventError::InvalidTransition {
                from: from.to_owned(),
                to: next,
                allowed: state.to.clone(),
            }));
        }

        let output = (state.output)(&input, &self.ctx);
        let target = &self.states[next.as_str()];
        if let Some(entry) = target.entry_substate() {
            trace!(machine = %self.name, from, to = %next, entry, "descending into entry substate");
            let entry = entry.to_owned();
            self.event(&entry, output)
        } else {
            trace!(machine = %self.name, from, to = %next, "transitioned");
            Ok(Event::Transitioned {
                state: next,
                output,
            })
        }
    }

    /// Begin a declared routine with an initial input.
    ///
    /// The returned [`Routine`] is lazy: nothing runs until
    /// [`step`](Routine::step) is called.
    ///
    /// # Errors
    ///
    /// Returns [`RoutineError::NoSuchRoutine`] for an undeclared name.
    pub fn routine(&self, name: &str, input: I) -> Result<Routine<'_, I, C>, Report<RoutineError>> {
        let steps = self.routines.get(name).ok_or_else(|| {
            Report::new(RoutineError::NoSuchRoutine {
                routine: name.to_owned(),
            })
        })?;
        Ok(Routine::new(self, steps, input))
    }
}

impl<I, C> fmt::Debug for Machine<I, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("name", &self.name)
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .field("routines", &self.routines.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> Machine<i64, ()> {
        MachineBuilder::new("counter", ())
            .state(
                State::new(
                    "A",
                    |input: &i64, _: &()| {
                        if *input > 10 {
                            Verdict::Reject
                        } else if input % 2 == 1 {
                            Verdict::Goto("B".into())
                        } else {
                            Verdict::Goto("A".into())
                        }
                    },
                    |input, _| input + 1,
                )
                .to(["A", "B"]),
            )
            .state(
                State::new(
                    "B",
                    |input: &i64, _: &()| {
                        if *input > 20 {
                            Verdict::Reject
                        } else if input % 2 == 1 {
                            Verdict::Goto("B".into())
                        } else {
                            Verdict::Goto("C".into())
                        }
                    },
                    |input, _| input + 2,
                )
                .to(["B", "C"]),
            )
            .state(
                State::new(
                    "C",
                    |input: &i64, _: &()| {
                        if *input > 30 {
                            Verdict::Reject
                        } else if *input >= 15 {
                            Verdict::Goto("A".into())
                        } else {
                            Verdict::Goto("C".into())
                        }
                    },
                    |input, _| input + 3,
                )
                .to(["C", "A"]),
            )
            .build()
            .unwrap()
    }

    fn transitioned<I: std::fmt::Debug>(event: Event<I>) -> (String, I) {
        match event {
            Event::Transitioned { state, output } => (state, output),
            Event::Rejected { state, input } => panic!("rejected at {state} with {input:?}"),
        }
    }

    #[test]
    fn single_events() {
        let m = counter();
        assert_eq!(transitioned(m.event("A", 1).unwrap()), ("B".into(), 2));
        assert_eq!(transitioned(m.event("A", 2).unwrap()), ("A".into(), 3));
        assert_eq!(transitioned(m.event("B", 1).unwrap()), ("B".into(), 3));
        assert_eq!(transitioned(m.event("B", 2).unwrap()), ("C".into(), 4));
        assert_eq!(transitioned(m.event("C", 12).unwrap()), ("C".into(), 15));
        assert_eq!(transitioned(m.event("C", 15).unwrap()), ("A".into(), 18));
    }

    #[test]
    fn rejection_is_a_value() {
        let m = counter();
        match m.event("A", 11).unwrap() {
            Event::Rejected { state, input } => {
                assert_eq!(state, "A");
                assert_eq!(input, 11);
            }
            Event::Transitioned { .. } => panic!("A rejects inputs above 10"),
        }
    }

    #[test]
    fn no_such_state() {
        let m = counter();
        let err = m.event("Z", 1).unwrap_err();
        assert!(matches!(
            err.current_context(),
            EventError::NoSuchState { state } if state == "Z"
        ));
    }

    #[test]
    fn invalid_transition_names_the_graph() {
        let m = MachineBuilder::new("bad", ())
            .state(
                State::new(
                    "start",
                    |_: &u32, _: &()| Verdict::Goto("finish".into()),
                    |input, _| *input,
                )
                .to(["start"]),
            )
            .state(State::new("finish", |_, _| Verdict::Reject, |input, _| *input))
            .build()
            .unwrap();

        let err = m.event("start", 1).unwrap_err();
        match err.current_context() {
            EventError::InvalidTransition { from, to, allowed } => {
                assert_eq!(from, "start");
                assert_eq!(to, "finish");
                assert_eq!(allowed, &["start".to_owned()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn descends_into_entry_substate() {
        // `outer` is composite: entering it runs its entry substate `inner`
        // with the previous output as input.
        let m = MachineBuilder::new("hier", ())
            .state(
                State::new(
                    "start",
                    |_: &u32, _: &()| Verdict::Goto("outer".into()),
                    |input, _| input * 10,
                )
                .to(["outer"]),
            )
            .state(
                State::new("outer", |_, _| Verdict::Reject, |input, _| *input)
                    .substates(["inner", "other"]),
            )
            .state(
                State::new(
                    "inner",
                    |_: &u32, _: &()| Verdict::Goto("done".into()),
                    |input, _| input + 1,
                )
                .to(["done"]),
            )
            .state(State::new("other", |_, _| Verdict::Reject, |input, _| *input))
            .state(State::new("done", |_, _| Verdict::Reject, |input, _| *input))
            .build()
            .unwrap();

        // start --(3)--> outer => descend: inner --(30)--> done, output 31
        assert_eq!(
            transitioned(m.event("start", 3).unwrap()),
            ("done".into(), 31)
        );
    }

    #[test]
    fn entry_substate_counts_as_allowed_target() {
        // Transitioning directly to the entry substate of a listed composite
        // target is valid even though the leaf is not in `to` itself.
        let m = MachineBuilder::new("hier", ())
            .state(
                State::new(
                    "start",
                    |_: &u32, _: &()| Verdict::Goto("inner".into()),
                    |input, _| *input,
                )
                .to(["outer"]),
            )
            .state(
                State::new("outer", |_, _| Verdict::Reject, |input, _| *input)
                    .substates(["inner"]),
            )
            .state(State::new("inner", |_, _| Verdict::Reject, |input, _| *input))
            .build()
            .unwrap();

        assert_eq!(m.allowed_from("start").unwrap(), ["inner", "outer"]);
        // Naming the leaf directly lands on it without running its hooks.
        assert_eq!(
            transitioned(m.event("start", 7).unwrap()),
            ("inner".into(), 7)
        );
    }

    #[test]
    fn build_rejects_unknown_target() {
        let err = MachineBuilder::new("bad", ())
            .state(
                State::new("a", |_: &u32, _: &()| Verdict::Reject, |input, _| *input)
                    .to(["ghost"]),
            )
            .build()
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            DefinitionError::UnknownTransitionTarget { target, .. } if target == "ghost"
        ));
    }

    #[test]
    fn build_rejects_duplicate_state() {
        let err = MachineBuilder::new("bad", ())
            .state(State::new("a", |_: &u32, _: &()| Verdict::Reject, |input, _| *input))
            .state(State::new("a", |_, _| Verdict::Reject, |input, _| *input))
            .build()
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            DefinitionError::DuplicateState { state } if state == "a"
        ));
    }

    #[test]
    fn build_rejects_entry_cycle() {
        let err = MachineBuilder::new("bad", ())
            .state(
                State::new("a", |_: &u32, _: &()| Verdict::Reject, |input, _| *input)
                    .substates(["b"]),
            )
            .state(State::new("b", |_, _| Verdict::Reject, |input, _| *input).substates(["a"]))
            .build()
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            DefinitionError::EntryCycle { .. }
        ));
    }
}
