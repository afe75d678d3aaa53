//! Test harness for multi-node cluster integration tests.
//!
//! Spins up real nodes on loopback UDP, each with its own working
//! directory and generated `raftify.json`, and provides polling helpers
//! for the eventually-consistent assertions the protocol calls for.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;

use raftify::{Node, NodeState};

/// Reserves a free loopback UDP port by binding an ephemeral socket and
/// releasing it again.
pub fn free_port() -> u16 {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").expect("failed to reserve port");
    socket.local_addr().unwrap().port()
}

/// Writes a `raftify.json` into `dir`.
pub fn write_config(
    dir: &Path,
    id: &str,
    max_nodes: usize,
    expect: usize,
    port: u16,
    peers: &[String],
) {
    let config = serde_json::json!({
        "id": id,
        "max_nodes": max_nodes,
        "expect": expect,
        "bind_addr": "127.0.0.1",
        "bind_port": port,
        "peer_list": peers,
    });
    std::fs::write(
        dir.join("raftify.json"),
        serde_json::to_vec_pretty(&config).unwrap(),
    )
    .unwrap();
}

/// Installs a fmt subscriber honoring `RUST_LOG` once per test binary.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// A running node together with its working directory.
pub struct TestNode {
    pub name: String,
    pub dir: TempDir,
    pub node: Node,
}

impl TestNode {
    pub fn state(&self) -> NodeState {
        self.node.state()
    }

    pub fn snapshot_exists(&self) -> bool {
        self.dir.path().join("state").is_file()
    }
}

/// A cluster of concurrently bootstrapped nodes.
pub struct TestCluster {
    pub nodes: Vec<TestNode>,
}

impl TestCluster {
    /// Boots a cluster where every listed node is expected for bootstrap.
    pub async fn bootstrap(names: &[&str]) -> Self {
        Self::bootstrap_with(names, names.len(), names.len()).await
    }

    /// Boots a cluster with explicit `expect` and `max_nodes` settings.
    pub async fn bootstrap_with(names: &[&str], expect: usize, max_nodes: usize) -> Self {
        init_tracing();

        let ports: Vec<u16> = names.iter().map(|_| free_port()).collect();
        let peers: Vec<String> = ports.iter().map(|p| format!("127.0.0.1:{p}")).collect();

        let mut pending = Vec::new();
        for (name, port) in names.iter().zip(&ports) {
            let dir = tempfile::tempdir().unwrap();
            write_config(dir.path(), name, max_nodes, expect, *port, &peers);

            let path = dir.path().to_path_buf();
            let handle = tokio::spawn(async move { Node::init(path).await });
            pending.push((name.to_string(), dir, handle));
        }

        let mut nodes = Vec::new();
        for (name, dir, handle) in pending {
            let node = tokio::time::timeout(Duration::from_secs(10), handle)
                .await
                .unwrap_or_else(|_| panic!("{name} did not finish bootstrapping"))
                .unwrap()
                .unwrap_or_else(|e| panic!("{name} failed to initialize: {e}"));
            nodes.push(TestNode { name, dir, node });
        }

        TestCluster { nodes }
    }

    pub fn get(&self, name: &str) -> &TestNode {
        self.nodes
            .iter()
            .find(|n| n.name == name)
            .unwrap_or_else(|| panic!("no node named {name}"))
    }

    /// Removes a node from the cluster, handing ownership to the caller
    /// (typically to shut it down and inspect its working directory).
    pub fn remove(&mut self, name: &str) -> TestNode {
        let index = self
            .nodes
            .iter()
            .position(|n| n.name == name)
            .unwrap_or_else(|| panic!("no node named {name}"));
        self.nodes.remove(index)
    }

    pub fn count_in_state(&self, state: NodeState) -> usize {
        self.nodes.iter().filter(|n| n.state() == state).count()
    }

    pub fn leader_name(&self) -> Option<String> {
        self.nodes
            .iter()
            .find(|n| n.state() == NodeState::Leader)
            .map(|n| n.name.clone())
    }

    pub fn follower_names(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.state() == NodeState::Follower)
            .map(|n| n.name.clone())
            .collect()
    }

    /// Waits until exactly one node reports the leader state.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Option<String> {
        let elected = wait_for(
            || async { self.count_in_state(NodeState::Leader) == 1 },
            timeout,
            Duration::from_millis(50),
        )
        .await;
        if elected {
            self.leader_name()
        } else {
            None
        }
    }

    /// Gracefully shuts down every remaining node.
    pub async fn shutdown_all(mut self) {
        while let Some(test_node) = self.nodes.pop() {
            let _ = test_node.node.shutdown().await;
        }
    }
}

/// Polls a condition until it holds or the timeout elapses.
pub async fn wait_for<F, Fut>(condition: F, timeout: Duration, poll: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll).await;
    }
    false
}

/// Asserts that a condition eventually becomes true.
pub async fn assert_eventually<F, Fut>(condition: F, timeout: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let ok = wait_for(condition, timeout, Duration::from_millis(50)).await;
    assert!(ok, "{message}");
}
