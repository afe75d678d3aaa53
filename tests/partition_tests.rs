//! Partition detection through missed prevote cycles.

mod test_harness;

use std::time::Duration;

use raftify::NodeState;
use test_harness::{wait_for, TestCluster};

/// A node cut off from all unicast stops at the rejoin state: its
/// prevotes go unanswered, so it never increments the term, never becomes
/// a candidate and never usurps leadership from inside a minority.
#[tokio::test]
async fn isolated_follower_reaches_rejoin_not_leadership() {
    let cluster = TestCluster::bootstrap(&["A", "B", "C"]).await;
    cluster.wait_for_leader(Duration::from_secs(5)).await.unwrap();

    let follower = cluster
        .follower_names()
        .first()
        .cloned()
        .expect("no follower to isolate");
    let isolated = cluster.get(&follower);

    // Drop all unicast to and from the other members.
    for node in &cluster.nodes {
        if node.name != follower {
            isolated.node.membership().block(&node.name);
        }
    }

    let reached_rejoin = wait_for(
        || async {
            // The isolated node must never claim leadership on the way.
            assert_ne!(isolated.state(), NodeState::Leader);
            isolated.state() == NodeState::Rejoin
        },
        Duration::from_secs(9),
        Duration::from_millis(50),
    )
    .await;
    assert!(reached_rejoin, "isolated node never reached the rejoin state");

    // The majority side is unimpressed: still one leader, one follower.
    assert_eq!(cluster.count_in_state(NodeState::Leader), 1);

    cluster.shutdown_all().await;
}

/// Healing the partition lets the node rejoin and follow again.
#[tokio::test]
async fn healed_partition_allows_rejoin() {
    let cluster = TestCluster::bootstrap(&["A", "B", "C"]).await;
    cluster.wait_for_leader(Duration::from_secs(5)).await.unwrap();

    let follower = cluster
        .follower_names()
        .first()
        .cloned()
        .expect("no follower to isolate");
    let isolated = cluster.get(&follower);

    for node in &cluster.nodes {
        if node.name != follower {
            isolated.node.membership().block(&node.name);
        }
    }

    let reached_rejoin = wait_for(
        || async { isolated.state() == NodeState::Rejoin },
        Duration::from_secs(9),
        Duration::from_millis(50),
    )
    .await;
    assert!(reached_rejoin, "isolated node never reached the rejoin state");

    for node in &cluster.nodes {
        if node.name != follower {
            isolated.node.membership().unblock(&node.name);
        }
    }

    let recovered = wait_for(
        || async { isolated.state() == NodeState::Follower },
        Duration::from_secs(5),
        Duration::from_millis(50),
    )
    .await;
    assert!(recovered, "node did not recover after the partition healed");

    assert_eq!(cluster.count_in_state(NodeState::Leader), 1);

    cluster.shutdown_all().await;
}
