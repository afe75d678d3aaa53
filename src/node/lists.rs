//! Per-cycle bookkeeping for outstanding heartbeats and (pre)votes.
//!
//! The lists are bounded by the cluster size, so a linear scan beats any
//! hashed structure here. Deletion is by identity: a heartbeat id or a
//! member name.

/// Tracks the heartbeats a leader sent out in the current ticker cycle.
/// Ids are monotonic across cycles so a response can be matched to the
/// cycle its heartbeat was issued in.
#[derive(Debug, Default)]
pub(super) struct HeartbeatIdList {
    /// Id the next outgoing heartbeat will carry.
    pub current_heartbeat_id: u64,

    /// Granted responses this cycle, the leader's own included.
    pub received: u64,

    /// Ids of heartbeats that have not been answered yet.
    pub pending: Vec<u64>,

    /// Consecutive ticker cycles without a majority of responses.
    pub sub_quorum_cycles: u64,
}

impl HeartbeatIdList {
    /// Registers a heartbeat that was just sent out.
    pub fn add(&mut self, heartbeat_id: u64) {
        self.pending.push(heartbeat_id);
    }

    /// Removes an answered heartbeat. Returns false when the id belongs to
    /// an earlier cycle and no longer counts.
    pub fn remove(&mut self, heartbeat_id: u64) -> bool {
        match self.pending.iter().position(|id| *id == heartbeat_id) {
            Some(index) => {
                self.pending.remove(index);
                true
            }
            None => false,
        }
    }

    /// Starts a new cycle: clears the pending ids and counts the leader's
    /// own response.
    pub fn reset(&mut self) {
        self.received = 1;
        self.pending.clear();
    }
}

/// Tracks the members that have not answered a (pre)vote request yet.
#[derive(Debug, Default)]
pub(super) struct VoteList {
    /// Granted (pre)votes, the node's own included.
    pub received: u64,

    /// Names of members that have not replied yet.
    pub pending: Vec<String>,

    /// Consecutive precandidate cycles without any prevote reply. Only
    /// used in the precandidate state; survives a list reset.
    pub missed_prevote_cycles: u64,
}

impl VoteList {
    /// Removes a (pre)voter that replied. Returns false when no reply was
    /// pending from that member.
    pub fn remove(&mut self, voter: &str) -> bool {
        match self.pending.iter().position(|name| name == voter) {
            Some(index) => {
                self.pending.remove(index);
                true
            }
            None => false,
        }
    }

    /// Starts a new collection round with the given pending members and
    /// the node's own (pre)vote already counted.
    pub fn reset(&mut self, pending: Vec<String>) {
        self.received = 1;
        self.pending = pending;
    }
}
