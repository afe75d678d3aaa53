//! Node states.

/// The states a node moves through over its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Waiting for the expected number of nodes to go online before the
    /// first leader election starts.
    Bootstrap,

    /// Trying to get back into a cluster the node dropped out of after a
    /// partition, crash or timeout.
    Rejoin,

    /// Resets its timeout on every current heartbeat; becomes a
    /// precandidate when the timeout elapses.
    Follower,

    /// Collects prevotes to verify no incumbent leader exists before a new
    /// term is started. Becomes a candidate on prevote quorum.
    PreCandidate,

    /// Has entered a new term and collects votes. Becomes leader on vote
    /// quorum; a split vote is retried in the next term after a timeout.
    Candidate,

    /// Periodically sends heartbeats to signal availability; steps down
    /// when a majority of heartbeat responses stays out for too long.
    Leader,

    /// Announces the new quorum to the remaining members before a
    /// voluntary departure.
    PreShutdown,

    /// Terminal state; the event loop exits after cleanup.
    Shutdown,
}

impl NodeState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            NodeState::Bootstrap => 0,
            NodeState::Rejoin => 1,
            NodeState::Follower => 2,
            NodeState::PreCandidate => 3,
            NodeState::Candidate => 4,
            NodeState::Leader => 5,
            NodeState::PreShutdown => 6,
            NodeState::Shutdown => 7,
        }
    }

    pub(crate) fn from_u8(value: u8) -> NodeState {
        match value {
            0 => NodeState::Bootstrap,
            1 => NodeState::Rejoin,
            2 => NodeState::Follower,
            3 => NodeState::PreCandidate,
            4 => NodeState::Candidate,
            5 => NodeState::Leader,
            6 => NodeState::PreShutdown,
            _ => NodeState::Shutdown,
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeState::Bootstrap => "Bootstrap",
            NodeState::Rejoin => "Rejoin",
            NodeState::Follower => "Follower",
            NodeState::PreCandidate => "PreCandidate",
            NodeState::Candidate => "Candidate",
            NodeState::Leader => "Leader",
            NodeState::PreShutdown => "PreShutdown",
            NodeState::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}
