//! End-to-end replication scenarios over the counter machine.

use std::time::Duration;

use bytes::Bytes;
use tandem_net::Registry;
use tandem_rsm::{Operator, Replica, ReplicaConfig, ReplicaError};
use tandem_testing::{cluster, counter_machine, init_tracing};
use tokio::time::{sleep, timeout};

const CONVERGE_TIMEOUT: Duration = Duration::from_secs(5);

async fn wait_for_state(replica: &Replica<i64>, expected: &str) {
    timeout(CONVERGE_TIMEOUT, async {
        loop {
            if replica.current_state().await.unwrap() == expected {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("replica reaches the expected state");
}

async fn wait_for_log_len(replica: &Replica<i64>, len: usize) -> Vec<Bytes> {
    timeout(CONVERGE_TIMEOUT, async {
        loop {
            let entries = replica.log().replay(None).await.unwrap();
            if entries.len() >= len {
                return entries;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("log converges")
}

#[tokio::test]
async fn operator_input_advances_to_b_with_output_two() {
    let _guard = init_tracing();
    let operator = Operator::start(counter_machine(), "A").unwrap();

    let (state, output) = operator.input(1).await.unwrap();
    assert_eq!((state.as_str(), output), ("B", 2));
    assert_eq!(operator.current_state().await.unwrap(), "B");
}

#[tokio::test]
async fn single_replica_applies_submissions() {
    let _guard = init_tracing();
    let mut cluster = cluster(&["r1"]).await;
    let replica = cluster.replicas.remove(0);

    let seq = replica.submit(&1).await.unwrap();
    assert_eq!(seq, 0);
    wait_for_state(&replica, "B").await;
}

#[tokio::test]
async fn all_replicas_apply_identical_transitions() {
    let _guard = init_tracing();
    let cluster = cluster(&["r1", "r2", "r3"]).await;

    cluster.replicas[0].submit(&1).await.unwrap();

    for replica in &cluster.replicas {
        wait_for_state(replica, "B").await;
    }

    let reference = wait_for_log_len(&cluster.replicas[0], 1).await;
    for replica in &cluster.replicas[1..] {
        assert_eq!(wait_for_log_len(replica, 1).await, reference);
    }
}

#[tokio::test]
async fn submissions_from_different_replicas_share_one_order() {
    let _guard = init_tracing();
    let cluster = cluster(&["r1", "r2", "r3"]).await;

    // Both keep the machine in A (even inputs loop); only the log order
    // distinguishes them.
    let (first, second) = tokio::join!(
        cluster.replicas[0].submit(&2),
        cluster.replicas[1].submit(&4),
    );
    first.unwrap();
    second.unwrap();

    let reference = wait_for_log_len(&cluster.replicas[0], 2).await;
    for replica in &cluster.replicas[1..] {
        assert_eq!(wait_for_log_len(replica, 2).await, reference);
    }

    // An odd input then moves every replica off A identically.
    cluster.replicas[2].submit(&1).await.unwrap();
    for replica in &cluster.replicas {
        wait_for_state(replica, "B").await;
    }
}

#[tokio::test]
async fn rejected_commands_are_logged_but_not_applied() {
    let _guard = init_tracing();
    let mut cluster = cluster(&["r1"]).await;
    let replica = cluster.replicas.remove(0);

    // 11 is above A's threshold: it reaches the log (consensus decided it)
    // but the machine rejects it on every replica alike.
    let seq = replica.submit(&11).await.unwrap();
    assert_eq!(seq, 0);
    assert_eq!(replica.log().replay(None).await.unwrap().len(), 1);
    assert_eq!(replica.current_state().await.unwrap(), "A");

    replica.submit(&1).await.unwrap();
    wait_for_state(&replica, "B").await;
}

#[tokio::test]
async fn duplicate_replica_name_fails_startup() {
    let _guard = init_tracing();
    let registry: Registry<Bytes> = Registry::new();

    let _first = Replica::start(
        registry.clone(),
        counter_machine(),
        "A",
        ReplicaConfig::new("r1", 2),
    )
    .await
    .unwrap();

    let err = Replica::start(
        registry.clone(),
        counter_machine(),
        "A",
        ReplicaConfig::new("r1", 2),
    )
    .await
    .unwrap_err();
    assert!(matches!(err.current_context(), ReplicaError::Network));
}

#[tokio::test]
async fn late_submissions_continue_the_shared_trajectory() {
    let _guard = init_tracing();
    let cluster = cluster(&["r1", "r2"]).await;

    // A -> B -> C: 1 moves to B (output 2), then 2 moves B to C.
    cluster.replicas[0].submit(&1).await.unwrap();
    for replica in &cluster.replicas {
        wait_for_state(replica, "B").await;
    }
    cluster.replicas[1].submit(&2).await.unwrap();
    for replica in &cluster.replicas {
        wait_for_state(replica, "C").await;
    }
}
