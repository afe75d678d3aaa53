//! The public node surface.
//!
//! [`Node::init`] loads the configuration, wires up membership, spawns the
//! event-loop task and blocks until the cluster is bootstrapped (or the
//! node has rejoined its old cluster). All accessors are synchronous and
//! read a mirror the loop maintains; only [`Node::shutdown`] talks to the
//! loop directly.

mod core;
mod handlers;
mod lists;
mod state;
mod timer;

pub use state::NodeState;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::config;
use crate::error::{RaftifyError, Result};
use crate::membership::{Membership, MembershipConfig};
use crate::snapshot;

use self::core::{RaftCore, SharedState, ShutdownReply};

/// Handle to a running raftified node.
pub struct Node {
    id: String,
    shared: Arc<SharedState>,
    membership: Membership,
    shutdown_tx: mpsc::Sender<ShutdownReply>,
}

impl Node {
    /// Initializes a node from `raftify.json` in the given working
    /// directory and starts its event loop.
    ///
    /// Blocks until the cluster has bootstrapped or, when a membership
    /// snapshot was found, until the node has rejoined its old cluster. A
    /// single-node cluster with no peers returns immediately after
    /// entering the leader state.
    pub async fn init(working_dir: impl Into<PathBuf>) -> Result<Node> {
        let working_dir = working_dir.into();

        // A snapshot means the node never explicitly left its cluster: it
        // crashed or was partitioned out, and its member list may be
        // stale. The persisted list replaces the configured peers for the
        // rejoin.
        let rejoin = snapshot::exists(&working_dir);
        if rejoin {
            debug!("found membership snapshot, preparing rejoin");
        }

        let mut config = config::load(&working_dir)?;
        if rejoin {
            let members = snapshot::load(&working_dir)?;
            config.rewrite_peer_list(&members);
        }
        config.remove_local_peer();
        config.validate()?;
        let secret_key = config.secret_key()?;

        let (membership, msg_rx, event_rx) = Membership::create(MembershipConfig {
            name: config.id.clone(),
            bind_addr: config.bind_addr.clone(),
            bind_port: config.bind_port,
            secret_key,
            event_capacity: config.max_nodes,
        })
        .await?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (bootstrap_tx, bootstrap_rx) = oneshot::channel();
        let shared = Arc::new(SharedState::new());

        let node = Node {
            id: config.id.clone(),
            shared: shared.clone(),
            membership: membership.clone(),
            shutdown_tx,
        };

        let core = RaftCore::new(
            config,
            working_dir,
            membership,
            msg_rx,
            event_rx,
            shutdown_rx,
            bootstrap_tx,
            shared,
            rejoin,
        );
        tokio::spawn(core.run());

        bootstrap_rx
            .await
            .map_err(|_| RaftifyError::BootstrapInterrupted)?;
        debug!(node = %node.id, "node successfully initialized");
        Ok(node)
    }

    /// Requests a graceful shutdown and blocks until the event loop has
    /// announced the new quorum, left the cluster and cleaned up.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.shutdown_tx.send(reply_tx).await.is_err() {
            return Err(self
                .shared
                .take_fatal()
                .unwrap_or(RaftifyError::AlreadyShutdown));
        }

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(self
                .shared
                .take_fatal()
                .unwrap_or(RaftifyError::AlreadyShutdown)),
        }
    }

    /// The node's unique id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The state the node is currently in.
    pub fn state(&self) -> NodeState {
        self.shared.state()
    }

    /// The term the node is currently at.
    pub fn term(&self) -> u64 {
        self.shared.term()
    }

    /// The current member list as an id to `host:port` mapping.
    pub fn members(&self) -> HashMap<String, String> {
        self.membership
            .members()
            .into_iter()
            .map(|member| (member.name, member.address))
            .collect()
    }

    /// Local node health as reported by the membership layer. Lower is
    /// better; 0 means fully healthy.
    pub fn health_score(&self) -> i32 {
        self.membership.health_score()
    }

    /// The membership facade, for host-level observability and for fault
    /// injection in tests.
    pub fn membership(&self) -> &Membership {
        &self.membership
    }
}
