//! Leader failure and re-election.

mod test_harness;

use std::time::Duration;

use raftify::NodeState;
use test_harness::{wait_for, TestCluster};

/// After the leader leaves, exactly one of the remaining nodes takes over
/// within three seconds.
#[tokio::test]
async fn new_leader_is_elected_after_leader_shutdown() {
    let mut cluster = TestCluster::bootstrap(&["A", "B", "C"]).await;
    let leader = cluster.wait_for_leader(Duration::from_secs(5)).await.unwrap();
    let old_term = cluster.get(&leader).node.term();

    let departed = cluster.remove(&leader);
    departed.node.shutdown().await.unwrap();

    let elected = wait_for(
        || async { cluster.count_in_state(NodeState::Leader) == 1 },
        Duration::from_secs(3),
        Duration::from_millis(50),
    )
    .await;
    assert!(elected, "no new leader within three seconds");

    let new_leader = cluster.leader_name().unwrap();
    assert_ne!(new_leader, leader);
    assert_eq!(cluster.count_in_state(NodeState::Follower), 1);

    // A new election means a new term.
    assert!(cluster.get(&new_leader).node.term() > old_term);

    cluster.shutdown_all().await;
}

/// At no point do two nodes consider themselves leader at once.
#[tokio::test]
async fn never_more_than_one_leader() {
    let mut cluster = TestCluster::bootstrap(&["A", "B", "C"]).await;
    let leader = cluster.wait_for_leader(Duration::from_secs(5)).await.unwrap();

    let departed = cluster.remove(&leader);
    departed.node.shutdown().await.unwrap();

    // Observe the cluster through the whole re-election window.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(4);
    while tokio::time::Instant::now() < deadline {
        assert!(cluster.count_in_state(NodeState::Leader) <= 1);
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(cluster.count_in_state(NodeState::Leader), 1);

    cluster.shutdown_all().await;
}
