//! Recovery through the persisted membership snapshot.

mod test_harness;

use std::time::Duration;

use raftify::{Node, NodeState};
use test_harness::{free_port, wait_for, write_config, TestCluster};

/// A node that starts with a membership snapshot in its working directory
/// rejoins the persisted cluster instead of bootstrapping, and init
/// returns as a follower once the rejoin went through.
#[tokio::test]
async fn snapshot_triggers_rejoin_into_running_cluster() {
    let cluster = TestCluster::bootstrap_with(&["A", "B"], 2, 3).await;
    cluster.wait_for_leader(Duration::from_secs(5)).await.unwrap();

    // Set up a third node whose working directory already carries the
    // survivors' snapshot, as if it had crashed out of this cluster.
    let dir = tempfile::tempdir().unwrap();
    let port = free_port();
    write_config(dir.path(), "C", 3, 2, port, &["127.0.0.1:1".to_string()]);
    std::fs::copy(
        cluster.get("A").dir.path().join("state"),
        dir.path().join("state"),
    )
    .unwrap();

    // The configured (unreachable) peer list is ignored: the snapshot
    // supplies the peers, and the rejoin completes within the first
    // timeout window.
    let rejoined = tokio::time::timeout(Duration::from_millis(1500), Node::init(dir.path()))
        .await
        .expect("rejoin did not complete in time")
        .unwrap();

    assert_eq!(rejoined.state(), NodeState::Follower);

    let converged = wait_for(
        || async { rejoined.members().len() == 3 },
        Duration::from_secs(2),
        Duration::from_millis(50),
    )
    .await;
    assert!(converged, "rejoined node did not learn the full member list");

    // The cluster still has exactly one leader.
    assert_eq!(cluster.count_in_state(NodeState::Leader), 1);

    rejoined.shutdown().await.unwrap();
    cluster.shutdown_all().await;
}

/// A voluntary shutdown removes the snapshot, so the next start is a
/// fresh bootstrap rather than a rejoin.
#[tokio::test]
async fn voluntary_shutdown_leaves_no_snapshot_behind() {
    let dir = tempfile::tempdir().unwrap();
    let port = free_port();
    write_config(dir.path(), "A", 1, 1, port, &[]);

    let node = Node::init(dir.path()).await.unwrap();
    assert!(dir.path().join("state").is_file());

    node.shutdown().await.unwrap();
    assert!(!dir.path().join("state").exists());
}
