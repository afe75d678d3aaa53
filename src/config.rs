//! Configuration loading and validation.
//!
//! Configuration is read from a `raftify.json` file in the node's working
//! directory. Defaults are materialized on load and all constraint
//! violations are reported together in a single error.

use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RaftifyError, Result};
use crate::membership::Member;

/// Interval in milliseconds in which candidates re-send vote requests and
/// leaders send out heartbeats.
pub const TICKER_INTERVAL_MS: u64 = 200;

/// Minimum time in milliseconds that a non-leader waits for a current
/// heartbeat to arrive before switching to a precandidate.
pub const MIN_TIMEOUT_MS: u64 = 800;

/// Maximum time in milliseconds that a non-leader waits for a current
/// heartbeat to arrive before switching to a precandidate.
pub const MAX_TIMEOUT_MS: u64 = 1200;

/// Maximum number of ticker cycles a leader can go without heartbeat
/// responses from a majority of the cluster before it must step down.
pub const MAX_SUB_QUORUM_CYCLES: u64 = MIN_TIMEOUT_MS / TICKER_INTERVAL_MS - 1;

/// Maximum number of consecutive precandidate cycles without any prevote
/// reply. Reaching this threshold means the node is assumed to be
/// partitioned out into a minority and triggers a rejoin.
pub const MAX_MISSED_PREVOTE_CYCLES: u64 = 5;

/// Name of the configuration file expected in the working directory.
pub const CONFIG_FILE: &str = "raftify.json";

/// Contents of the `raftify.json` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Unique identifier of the node within the cluster.
    #[serde(default)]
    pub id: String,

    /// Self-imposed limit of nodes that can be run in one cluster. Also
    /// sizes the buffered membership event channel.
    #[serde(default)]
    pub max_nodes: usize,

    /// Hex-encoded 16-, 24- or 32-byte pre-shared key handed to the
    /// membership layer. Empty disables frame authentication.
    #[serde(default)]
    pub encrypt: String,

    /// Multiplier applied to every timeout and interval, for higher
    /// latency environments.
    #[serde(default)]
    pub performance: u64,

    /// Number of nodes expected to go online before the cluster is
    /// bootstrapped and the first leader election starts.
    #[serde(default)]
    pub expect: usize,

    /// Log level directive: DEBUG, INFO, WARN or ERR.
    #[serde(default)]
    pub log_level: String,

    /// Address to bind the node to.
    #[serde(default)]
    pub bind_addr: String,

    /// Port to bind the node to.
    #[serde(default)]
    pub bind_port: u16,

    /// Peers to contact in order to join an existing cluster or form a
    /// new one, in `host:port` format.
    #[serde(default)]
    pub peer_list: Vec<String>,
}

impl Config {
    /// Materializes defaults for every optional field that was omitted or
    /// left at its zero value.
    pub fn apply_defaults(&mut self) {
        if self.performance == 0 {
            self.performance = 1;
        }
        if self.log_level.is_empty() {
            self.log_level = "WARN".to_string();
        }
        if self.bind_addr.is_empty() {
            self.bind_addr = "0.0.0.0".to_string();
        }
        if self.bind_port == 0 {
            self.bind_port = 7946;
        }
    }

    /// The local node's `host:port` address as it appears in peer lists.
    pub fn local_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.bind_port)
    }

    /// Removes the local node from the peer list. The local node would
    /// always reach itself, which would mask a join failure against every
    /// other peer.
    pub fn remove_local_peer(&mut self) {
        let local = self.local_address();
        self.peer_list.retain(|peer| *peer != local);
    }

    /// Replaces the peer list with the addresses from a persisted
    /// membership snapshot, excluding the local node. Used when a node
    /// needs to rejoin the cluster it dropped out of.
    pub fn rewrite_peer_list(&mut self, members: &[Member]) {
        let local = self.local_address();
        self.peer_list = members
            .iter()
            .filter(|member| member.address != local)
            .map(|member| member.address.clone())
            .collect();
    }

    /// Decodes the configured pre-shared key. Returns `None` when frame
    /// authentication is disabled.
    pub fn secret_key(&self) -> Result<Option<Vec<u8>>> {
        if self.encrypt.is_empty() {
            return Ok(None);
        }
        let key = hex::decode(&self.encrypt).map_err(|e| {
            RaftifyError::InvalidConfig(format!("encrypt is not valid hex: {e}"))
        })?;
        Ok(Some(key))
    }

    /// A `tracing` filter directive matching the configured log level,
    /// e.g. `raftify=warn`. The host installs the subscriber.
    pub fn tracing_directive(&self) -> String {
        let level = match self.log_level.as_str() {
            "DEBUG" => "debug",
            "INFO" => "info",
            "ERR" => "error",
            _ => "warn",
        };
        format!("raftify={level}")
    }

    /// Checks for constraint violations. All violations found are
    /// aggregated into a single error.
    pub fn validate(&self) -> Result<()> {
        let mut errs = Vec::new();

        if self.id.is_empty() {
            errs.push("id must not be empty".to_string());
        }
        if self.max_nodes == 0 {
            errs.push("max_nodes must be greater than 0".to_string());
        }
        if !self.encrypt.is_empty() {
            match hex::decode(&self.encrypt) {
                Ok(key) if matches!(key.len(), 16 | 24 | 32) => {}
                Ok(key) => errs.push(format!(
                    "encrypt must be of length 16, 24 or 32 bytes: got {} bytes",
                    key.len()
                )),
                Err(_) => errs.push("encrypt must be a hex-encoded key".to_string()),
            }
        }
        if self.expect < 1 || self.expect > self.max_nodes {
            errs.push(format!("expect must be between 1 and {}", self.max_nodes));
        }
        if self.expect > 1 && self.peer_list.is_empty() {
            errs.push(
                "peer_list must not be empty if more than one node is expected for bootstrap"
                    .to_string(),
            );
        }
        if !matches!(self.log_level.as_str(), "DEBUG" | "INFO" | "WARN" | "ERR") {
            errs.push("log_level must be DEBUG, INFO, WARN or ERR".to_string());
        }
        if self.bind_addr.parse::<Ipv4Addr>().is_err() {
            errs.push(format!("bind_addr {} is not a valid IPv4", self.bind_addr));
        }
        if self.peer_list.len() > self.max_nodes {
            errs.push(format!(
                "peer_list must not contain more than {} peers, including the local node: got {} peers",
                self.max_nodes,
                self.peer_list.len()
            ));
        }
        for peer in &self.peer_list {
            match peer.rsplit_once(':') {
                Some((host, port)) => {
                    if host.parse::<Ipv4Addr>().is_err() {
                        errs.push(format!("peer address {peer} has an invalid IPv4 host"));
                    }
                    if port.parse::<u16>().is_err() {
                        errs.push(format!("peer address {peer} has an invalid port"));
                    }
                }
                None => errs.push(format!("peer address {peer} is not a valid host:port address")),
            }
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(RaftifyError::InvalidConfig(errs.join("\n")))
        }
    }
}

/// Reads and parses `raftify.json` from the working directory and
/// materializes defaults. Validation is left to the caller, which may
/// first rewrite the peer list from a membership snapshot.
pub fn load(working_dir: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(working_dir.join(CONFIG_FILE))?;
    let mut config: Config = serde_json::from_str(&raw)?;
    config.apply_defaults();
    Ok(config)
}
