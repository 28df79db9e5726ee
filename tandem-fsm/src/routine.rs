//! Declarative multi-step routines.
//!
//! A routine is a non-branching script of expected state names. Execution is
//! lazy: each [`Routine::step`] call applies one event and checks that the
//! machine landed on the next declared step. Routines are finite and
//! non-restartable; once finished, further steps yield nothing.

use std::fmt;

use error_stack::{Report, ResultExt};
use tracing::trace;

use crate::machine::{Event, Machine};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutineError {
    NoSuchRoutine {
        routine: String,
    },
    /// An event landed on a state other than the declared next step.
    Broken {
        expected: String,
        actual: String,
        remaining: Vec<String>,
    },
    /// The underlying event raised a machine error.
    Event,
}

impl fmt::Display for RoutineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchRoutine { routine } => write!(f, "no such routine: `{routine}`"),
            Self::Broken {
                expected,
                actual,
                remaining,
            } => write!(
                f,
                "routine broken: expected `{expected}`, reached `{actual}` (remaining: {remaining:?})"
            ),
            Self::Event => f.write_str("event failed during routine step"),
        }
    }
}

impl std::error::Error for RoutineError {}

/// What one forced routine step observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutineStep<I> {
    /// The named step ran with this input; more steps remain.
    Next { state: String, input: I },
    /// The final step ran; the routine is complete.
    Done { output: I },
    /// The step's state rejected the input; the routine halts.
    Rejected { state: String, input: I },
}

/// A suspended routine execution over a borrowed machine.
///
/// The routine does not own the machine; events applied concurrently through
/// other handles interleave with the routine's own steps.
pub struct Routine<'m, I, C> {
    machine: &'m Machine<I, C>,
    steps: &'m [String],
    index: usize,
    input: Option<I>,
}

impl<'m, I, C> Routine<'m, I, C> {
    pub(crate) fn new(machine: &'m Machine<I, C>, steps: &'m [String], input: I) -> Self {
        Self {
            machine,
            steps,
            index: 0,
            input: Some(input),
        }
    }

    /// The step that will run next, with its input. `None` once finished.
    #[must_use]
    pub fn pending(&self) -> Option<(&str, &I)> {
        let input = self.input.as_ref()?;
        Some((self.steps[self.index].as_str(), input))
    }

    /// Force one step.
    ///
    /// Applies an event at the current step's state and, when more steps
    /// remain, requires the machine to have landed exactly on the next
    /// declared step. Returns `Ok(None)` once the routine has finished in
    /// any way (done, rejected, or broken).
    ///
    /// # Errors
    ///
    /// Returns [`RoutineError::Broken`] on a trajectory mismatch and
    /// [`RoutineError::Event`] when the event itself raises.
    pub fn step(&mut self) -> Result<Option<RoutineStep<I>>, Report<RoutineError>>
    where
        I: Clone,
    {
        let Some(input) = self.input.take() else {
            return Ok(None);
        };
        let step_name = &self.steps[self.index];

        let event = self
            .machine
            .event(step_name, input.clone())
            .change_context(RoutineError::Event)?;

        match event {
            Event::Rejected { state, input } => {
                trace!(step = %step_name, %state, "routine halted by rejection");
                Ok(Some(RoutineStep::Rejected { state, input }))
            }
            Event::Transitioned { state, output } => {
                self.index += 1;
                let Some(expected) = self.steps.get(self.index) else {
                    trace!(step = %step_name, "routine complete");
                    return Ok(Some(RoutineStep::Done { output }));
                };
                if *expected != state {
                    return Err(Report::new(RoutineError::Broken {
                        expected: expected.clone(),
                        actual: state,
                        remaining: self.steps[self.index..].to_vec(),
                    }));
                }
                self.input = Some(output);
                trace!(step = %step_name, next = %state, "routine step");
                Ok(Some(RoutineStep::Next {
                    state: step_name.clone(),
                    input,
                }))
            }
        }
    }

    /// Drive the routine to completion, collecting every observed step.
    ///
    /// # Errors
    ///
    /// Propagates the first [`RoutineError`] raised by [`step`](Self::step).
    pub fn run(mut self) -> Result<Vec<RoutineStep<I>>, Report<RoutineError>>
    where
        I: Clone,
    {
        let mut observed = Vec::with_capacity(self.steps.len());
        while let Some(step) = self.step()? {
            observed.push(step);
        }
        Ok(observed)
    }
}

impl<I: fmt::Debug, C> fmt::Debug for Routine<'_, I, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Routine")
            .field("steps", &self.steps)
            .field("index", &self.index)
            .field("input", &self.input)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MachineBuilder;
    use crate::state::{State, Verdict};

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
            .routine("testing_1", ["A", "B", "C"])
            .routine("testing_2", ["A", "A", "B"])
            .routine("solo", ["A"])
            .routine("doomed", ["A", "C", "B"])
            .build()
            .unwrap()
    }

    #[test]
    fn chained_routine_observes_declared_trajectory() {
        let m = counter();
        let routine = m.routine("testing_1", 1).unwrap();
        let observed = routine.run().unwrap();
        assert_eq!(
            observed,
            [
                RoutineStep::Next {
                    state: "A".into(),
                    input: 1
                },
                RoutineStep::Next {
                    state: "B".into(),
                    input: 2
                },
                RoutineStep::Done { output: 7 },
            ]
        );
    }

    #[test]
    fn routine_may_revisit_states() {
        let m = counter();
        let observed = m.routine("testing_2", 2).unwrap().run().unwrap();
        assert_eq!(
            observed,
            [
                RoutineStep::Next {
                    state: "A".into(),
                    input: 2
                },
                RoutineStep::Next {
                    state: "A".into(),
                    input: 3
                },
                RoutineStep::Done { output: 6 },
            ]
        );
    }

    #[test]
    fn single_step_routine_halts_immediately() {
        let m = counter();
        let mut routine = m.routine("solo", 1).unwrap();
        assert_eq!(
            routine.step().unwrap(),
            Some(RoutineStep::Done { output: 2 })
        );
        assert_eq!(routine.step().unwrap(), None);
        assert!(routine.pending().is_none());
    }

    #[test]
    fn routine_is_lazy() {
        let m = counter();
        let routine = m.routine("testing_1", 1).unwrap();
        // Nothing has run yet; the first step is still pending.
        assert_eq!(routine.pending(), Some(("A", &1)));
    }

    #[test]
    fn no_such_routine() {
        let m = counter();
        let err = m.routine("missing", 1).unwrap_err();
        assert!(matches!(
            err.current_context(),
            RoutineError::NoSuchRoutine { routine } if routine == "missing"
        ));
    }

    #[test]
    fn broken_routine_reports_remaining_steps() {
        let m = counter();
        // A with odd input moves to B, but the script expects C next.
        let mut routine = m.routine("doomed", 1).unwrap();
        let err = routine.step().unwrap_err();
        match err.current_context() {
            RoutineError::Broken {
                expected,
                actual,
                remaining,
            } => {
                assert_eq!(expected, "C");
                assert_eq!(actual, "B");
                assert_eq!(remaining, &["C".to_owned(), "B".to_owned()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // A broken routine is spent.
        assert_eq!(routine.step().unwrap(), None);
    }

    #[test]
    fn rejection_halts_without_breaking() {
        let m = counter();
        // 11 is rejected by A before any step of the script runs.
        let observed = m.routine("testing_1", 11).unwrap().run().unwrap();
        assert_eq!(
            observed,
            [RoutineStep::Rejected {
                state: "A".into(),
                input: 11
            }]
        );
    }
}
