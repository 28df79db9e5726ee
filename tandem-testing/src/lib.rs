//! Shared fixtures for tandem integration tests.
//!
//! Provides the counter machine used across the test suites, a helper to
//! wire a full in-process cluster, and test-scoped tracing setup.

#![warn(clippy::pedantic)]

use bytes::Bytes;
use tandem_fsm::{Machine, MachineBuilder, State, Verdict};
use tandem_net::Registry;
use tandem_rsm::{Replica, ReplicaConfig};

/// Initialize tracing for tests. Call at the start of each test.
/// Uses the `RUST_LOG` env var for filtering (defaults to "debug" for the
/// tandem crates).
pub fn init_tracing() -> impl Sized {
    use tracing::Dispatch;
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::{EnvFilter, fmt};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("tandem_fsm=debug,tandem_net=debug,tandem_paxos=debug,tandem_log=debug,tandem_rsm=debug")
            }),
        )
        .with_span_events(FmtSpan::CLOSE)
        .with_test_writer()
        .finish();

    // Set as the default for this thread only; a global default would leak
    // across concurrently running tests.
    let dispatch = Dispatch::new(subscriber);
    tracing::dispatcher::set_default(&dispatch)
}

/// The three-state counter machine.
///
/// Each state adds its index to the input (`A`: +1, `B`: +2, `C`: +3) and
/// rejects inputs above its threshold (10/20/30). `A` and `B` move on for
/// odd inputs and loop for even ones; `C` cycles back to `A` once the value
/// reaches 15. Routines `testing_1 = [A, B, C]` and `testing_2 = [A, A, B]`
/// are declared.
#[must_use]
pub fn counter_machine() -> Machine<i64, ()> {
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
        .build()
        .expect("counter machine declaration is valid")
}

/// A wired in-process cluster of counter-machine replicas, all starting at
/// `A`.
pub struct Cluster {
    pub registry: Registry<Bytes>,
    pub replicas: Vec<Replica<i64>>,
}

/// Start one replica per name over a single registry.
///
/// # Panics
///
/// Panics if any replica fails to start (duplicate names, for instance).
pub async fn cluster(names: &[&str]) -> Cluster {
    let registry: Registry<Bytes> = Registry::new();
    let mut replicas = Vec::with_capacity(names.len());
    for name in names {
        let replica = Replica::start(
            registry.clone(),
            counter_machine(),
            "A",
            ReplicaConfig::new(*name, names.len()),
        )
        .await
        .expect("replica starts");
        replicas.push(replica);
    }
    Cluster { registry, replicas }
}
