//! Handlers for inbound protocol messages.
//!
//! Each handler turns (current node, message) into state transitions and
//! outbound replies. Handlers never surface errors: anomalies are logged
//! and the message dropped. The one exception is a leader observing a
//! second leader at its own or a higher term, which is an unrecoverable
//! protocol violation and tears the node down.

use tracing::{debug, error, warn};

use crate::error::RaftifyError;
use crate::message::{
    Heartbeat, HeartbeatResponse, NewQuorum, PreVoteRequest, PreVoteResponse, VoteRequest,
    VoteResponse,
};

use super::core::RaftCore;
use super::state::NodeState;

impl RaftCore {
    pub(super) async fn handle_heartbeat(&mut self, msg: Heartbeat) {
        match self.state {
            NodeState::Follower => {
                // Followers adopt the leader's quorum unconditionally.
                self.quorum = msg.quorum;

                if self.current_term < msg.term {
                    debug!(leader = %msg.leader_id, term = msg.term, "heartbeat with higher term, adopting");
                    self.to_follower(msg.term);
                } else if self.current_term > msg.term {
                    // Answer an outdated heartbeat without resetting the
                    // timeout; the response carries the higher term so the
                    // stale leader notices and steps down.
                    debug!(leader = %msg.leader_id, "outdated heartbeat");
                    self.send_heartbeat_response(&msg.leader_id, msg.heartbeat_id).await;
                } else {
                    debug!(leader = %msg.leader_id, "received heartbeat");
                    self.send_heartbeat_response(&msg.leader_id, msg.heartbeat_id).await;
                    self.reset_timeout();
                }
            }

            NodeState::PreCandidate | NodeState::Candidate => {
                if self.current_term <= msg.term {
                    debug!(leader = %msg.leader_id, term = msg.term, "heartbeat from an incumbent leader, stepping back");
                    self.quorum = msg.quorum;
                    self.to_follower(msg.term);
                    self.send_heartbeat_response(&msg.leader_id, msg.heartbeat_id).await;
                } else {
                    debug!(leader = %msg.leader_id, "outdated heartbeat, ignoring");
                }
            }

            NodeState::Leader => {
                if msg.term >= self.current_term {
                    // Two leaders at the same or a higher term must never
                    // exist; this cannot be repaired locally.
                    let violation = format!(
                        "leader {} (term {}) received heartbeat from {} (term {}), possible double leadership",
                        self.config.id, self.current_term, msg.leader_id, msg.term
                    );
                    error!(%violation);
                    self.fatal = Some(RaftifyError::ProtocolViolation(violation));
                    self.to_shutdown();
                } else {
                    warn!(leader = %msg.leader_id, term = msg.term, "heartbeat from a stale leader");
                    self.send_heartbeat_response(&msg.leader_id, msg.heartbeat_id).await;
                }
            }

            _ => debug!(leader = %msg.leader_id, state = %self.state, "discarding heartbeat"),
        }
    }

    pub(super) fn handle_heartbeat_response(&mut self, msg: HeartbeatResponse) {
        if self.state != NodeState::Leader {
            warn!(state = %self.state, "received heartbeat response outside leader state");
            return;
        }

        if self.current_term < msg.term {
            debug!(follower = %msg.follower_id, term = msg.term, "heartbeat response with higher term, stepping down");
            self.to_follower(msg.term);
            return;
        }
        if self.current_term > msg.term {
            debug!(follower = %msg.follower_id, "outdated heartbeat response");
            return;
        }

        // A response whose id is not pending belongs to an earlier cycle
        // and no longer counts.
        if !self.heartbeat_ids.remove(msg.heartbeat_id) {
            debug!(follower = %msg.follower_id, heartbeat_id = msg.heartbeat_id, "no heartbeat pending with this id");
            return;
        }
        debug!(follower = %msg.follower_id, "received heartbeat response");
        self.heartbeat_ids.received += 1;
    }

    pub(super) async fn handle_prevote_request(&mut self, msg: PreVoteRequest) {
        debug!(precandidate = %msg.pre_candidate_id, "received prevote request");

        // A precandidate is contesting the same vacancy; it never grants a
        // rival's prevote.
        if self.state == NodeState::PreCandidate {
            self.send_prevote_response(&msg.pre_candidate_id, false).await;
            return;
        }

        if self.current_term >= msg.next_term {
            debug!(precandidate = %msg.pre_candidate_id, "outdated prevote request");
            self.send_prevote_response(&msg.pre_candidate_id, false).await;
            return;
        }

        self.send_prevote_response(&msg.pre_candidate_id, true).await;
    }

    pub(super) async fn handle_prevote_response(&mut self, msg: PreVoteResponse) {
        if self.state != NodeState::PreCandidate {
            warn!(state = %self.state, "received prevote response outside precandidate state");
            return;
        }

        if self.current_term < msg.term {
            debug!(follower = %msg.follower_id, term = msg.term, "prevote response with higher term, adopting");
            self.to_follower(msg.term);
            return;
        }
        if self.current_term > msg.term {
            debug!(follower = %msg.follower_id, "outdated prevote response");
            return;
        }

        // Any same-term reply proves the node is not partitioned out.
        self.prevotes.missed_prevote_cycles = 0;

        if !self.prevotes.remove(&msg.follower_id) {
            debug!(follower = %msg.follower_id, "no prevote pending from this member");
            return;
        }

        if msg.pre_vote_granted {
            debug!(follower = %msg.follower_id, "prevote granted");
            self.prevotes.received += 1;
            if self.quorum_reached(self.prevotes.received) {
                self.to_candidate().await;
            }
        } else {
            debug!(follower = %msg.follower_id, "prevote not granted");
        }
    }

    pub(super) async fn handle_vote_request(&mut self, msg: VoteRequest) {
        if self.current_term < msg.term {
            debug!(candidate = %msg.candidate_id, term = msg.term, "vote request with higher term, adopting");
            self.to_follower(msg.term);
        } else if self.current_term > msg.term {
            debug!(candidate = %msg.candidate_id, "outdated vote request");
            self.send_vote_response(&msg.candidate_id, false).await;
            return;
        } else {
            debug!(candidate = %msg.candidate_id, "received vote request");
        }

        if !self.voted_for.is_empty() {
            self.send_vote_response(&msg.candidate_id, false).await;
            return;
        }

        // Recording the grant is what limits this node to one vote per
        // term.
        self.voted_for = msg.candidate_id.clone();
        self.send_vote_response(&msg.candidate_id, true).await;
    }

    pub(super) async fn handle_vote_response(&mut self, msg: VoteResponse) {
        if self.state != NodeState::Candidate {
            warn!(state = %self.state, "received vote response outside candidate state");
            return;
        }

        if self.current_term < msg.term {
            debug!(follower = %msg.follower_id, term = msg.term, "vote response with higher term, stepping down");
            self.to_follower(msg.term);
            return;
        }
        if self.current_term > msg.term {
            debug!(follower = %msg.follower_id, "outdated vote response");
            return;
        }

        if !self.votes.remove(&msg.follower_id) {
            debug!(follower = %msg.follower_id, "no vote pending from this member");
            return;
        }

        if msg.vote_granted {
            debug!(follower = %msg.follower_id, "vote granted");
            self.votes.received += 1;
            if self.quorum_reached(self.votes.received) {
                self.to_leader().await;
            }
        } else {
            debug!(follower = %msg.follower_id, "vote not granted");
        }
    }

    /// The announced quorum takes effect only once the announcing node's
    /// leave event has been observed, so the member count and the quorum
    /// change together.
    pub(super) fn handle_new_quorum(&mut self, msg: NewQuorum) {
        debug!(leaving = %msg.leaving_id, new_quorum = msg.new_quorum, "received new quorum, waiting for the node to leave");
        self.pending_quorum = Some(msg);
    }
}
