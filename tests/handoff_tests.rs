//! Voluntary-leave quorum handoff.

mod test_harness;

use std::time::Duration;

use raftify::NodeState;
use test_harness::{wait_for, TestCluster};

/// A follower's voluntary departure hands the reduced quorum to the
/// survivors without disturbing leadership, and its snapshot is gone.
#[tokio::test]
async fn follower_leave_keeps_cluster_stable() {
    let mut cluster = TestCluster::bootstrap(&["A", "B", "C"]).await;
    let leader = cluster.wait_for_leader(Duration::from_secs(5)).await.unwrap();

    let follower = cluster
        .follower_names()
        .first()
        .cloned()
        .expect("no follower to shut down");
    let departed = cluster.remove(&follower);
    departed.node.shutdown().await.unwrap();

    // A voluntary leave deletes the departing node's snapshot.
    assert!(!departed.snapshot_exists());

    // Survivors observe the shrunken cluster.
    let converged = wait_for(
        || async {
            cluster
                .nodes
                .iter()
                .all(|node| node.node.members().len() == 2)
        },
        Duration::from_secs(4),
        Duration::from_millis(50),
    )
    .await;
    assert!(converged, "survivors did not observe the departure");

    // The handed-off quorum of two keeps the remaining pair electable and
    // stable: the leader stays, the follower stays.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(cluster.get(&leader).state(), NodeState::Leader);
    assert_eq!(cluster.count_in_state(NodeState::Follower), 1);

    cluster.shutdown_all().await;
}

/// Successive voluntary departures walk the quorum all the way down to
/// one; the last node keeps leading alone.
#[tokio::test]
async fn successive_leaves_shrink_quorum_to_one() {
    let mut cluster = TestCluster::bootstrap(&["A", "B", "C"]).await;
    let leader = cluster.wait_for_leader(Duration::from_secs(5)).await.unwrap();

    for follower in cluster.follower_names() {
        let departed = cluster.remove(&follower);
        departed.node.shutdown().await.unwrap();
    }

    let alone = wait_for(
        || async { cluster.get(&leader).node.members().len() == 1 },
        Duration::from_secs(4),
        Duration::from_millis(50),
    )
    .await;
    assert!(alone, "leader did not observe both departures");

    // With an installed quorum of one the survivor keeps leading.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(cluster.get(&leader).state(), NodeState::Leader);

    cluster.shutdown_all().await;
}

/// When the leader of a two-node cluster leaves, the announced quorum of
/// one lets the remaining node become leader without an election.
#[tokio::test]
async fn survivor_of_leader_leave_takes_over_without_election() {
    let mut cluster = TestCluster::bootstrap(&["A", "B"]).await;
    let leader = cluster.wait_for_leader(Duration::from_secs(5)).await.unwrap();
    let survivor = cluster
        .nodes
        .iter()
        .find(|n| n.name != leader)
        .unwrap()
        .name
        .clone();
    let survivor_term = cluster.get(&survivor).node.term();

    let departed = cluster.remove(&leader);
    departed.node.shutdown().await.unwrap();

    let took_over = wait_for(
        || async { cluster.get(&survivor).state() == NodeState::Leader },
        Duration::from_secs(2),
        Duration::from_millis(25),
    )
    .await;
    assert!(took_over, "survivor did not take over leadership");

    // No election ran; the survivor leads at its existing term.
    assert_eq!(cluster.get(&survivor).node.term(), survivor_term);

    cluster.shutdown_all().await;
}
