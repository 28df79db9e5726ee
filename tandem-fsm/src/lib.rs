//! Hierarchical finite state machine engine.
//!
//! A [`Machine`] is a set of user-declared [`State`]s with an
//! allowed-transitions graph. Feeding an input to a state runs the state's
//! transition hook, validates the target against the graph, computes an
//! output, and descends into entry substates until a leaf is reached.
//!
//! Multi-step trajectories can be declared as *routines*: named scripts of
//! expected state names that execute lazily as a chain of events.
//!
//! # Quick Start
//!
//! ```
//! use tandem_fsm::{MachineBuilder, State, Verdict, Event};
//!
//! let machine = MachineBuilder::new("door", ())
//!     .state(
//!         State::new(
//!             "closed",
//!             |_input: &u32, _ctx: &()| Verdict::Goto("open".into()),
//!             |input, _ctx| input + 1,
//!         )
//!         .to(["open"]),
//!     )
//!     .state(
//!         State::new("open", |_input, _ctx| Verdict::Reject, |input, _ctx| *input)
//!             .to(["closed"]),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let Event::Transitioned { state, output } = machine.event("closed", 1).unwrap() else {
//!     panic!("closed accepts every input");
//! };
//! assert_eq!((state.as_str(), output), ("open", 2));
//! ```

#![warn(clippy::pedantic)]

mod machine;
mod routine;
mod state;

pub use machine::{DefinitionError, Event, EventError, Machine, MachineBuilder};
pub use routine::{Routine, RoutineError, RoutineStep};
pub use state::{State, Verdict};
