//! Wire protocol messages.
//!
//! Every message on the wire is a JSON envelope `{"type": <u8>, "content":
//! <raw JSON>}`. The `type` discriminants are part of the wire contract and
//! must never be renumbered.

use serde::{Deserialize, Serialize};

use crate::error::{RaftifyError, Result};

/// Stable wire discriminants for the envelope `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Heartbeat = 0,
    HeartbeatResponse = 1,
    PreVoteRequest = 2,
    PreVoteResponse = 3,
    VoteRequest = 4,
    VoteResponse = 5,
    NewQuorum = 6,
}

impl MessageType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Heartbeat),
            1 => Some(Self::HeartbeatResponse),
            2 => Some(Self::PreVoteRequest),
            3 => Some(Self::PreVoteResponse),
            4 => Some(Self::VoteRequest),
            5 => Some(Self::VoteResponse),
            6 => Some(Self::NewQuorum),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Heartbeat => "Heartbeat",
            Self::HeartbeatResponse => "HeartbeatResponse",
            Self::PreVoteRequest => "PreVoteRequest",
            Self::PreVoteResponse => "PreVoteResponse",
            Self::VoteRequest => "VoteRequest",
            Self::VoteResponse => "VoteResponse",
            Self::NewQuorum => "NewQuorum",
        };
        f.write_str(name)
    }
}

/// Sent by the leader to all cluster members to signal availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub term: u64,
    pub quorum: u64,
    pub heartbeat_id: u64,
    pub leader_id: String,
}

/// A follower's reply to a leader heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub term: u64,
    pub heartbeat_id: u64,
    pub follower_id: String,
}

/// Sent by a follower that is about to become a candidate, to check
/// whether there truly is no leader anymore before incrementing the term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreVoteRequest {
    pub next_term: u64,
    pub pre_candidate_id: String,
}

/// Reply to a precandidate's prevote request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreVoteResponse {
    pub term: u64,
    pub follower_id: String,
    pub pre_vote_granted: bool,
}

/// Sent by a candidate to all cluster members to ask for votes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: u64,
    pub candidate_id: String,
}

/// Reply to a candidate's vote request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: u64,
    pub follower_id: String,
    pub vote_granted: bool,
}

/// Sent reliably by a node that is voluntarily leaving the cluster,
/// triggering an immediate quorum change once the leave event arrives.
/// Crash-related leaves never produce this message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQuorum {
    pub new_quorum: u64,
    pub leaving_id: String,
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Heartbeat(Heartbeat),
    HeartbeatResponse(HeartbeatResponse),
    PreVoteRequest(PreVoteRequest),
    PreVoteResponse(PreVoteResponse),
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    NewQuorum(NewQuorum),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    message_type: u8,
    content: serde_json::Value,
}

impl Message {
    /// Returns the wire discriminant of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Heartbeat(_) => MessageType::Heartbeat,
            Self::HeartbeatResponse(_) => MessageType::HeartbeatResponse,
            Self::PreVoteRequest(_) => MessageType::PreVoteRequest,
            Self::PreVoteResponse(_) => MessageType::PreVoteResponse,
            Self::VoteRequest(_) => MessageType::VoteRequest,
            Self::VoteResponse(_) => MessageType::VoteResponse,
            Self::NewQuorum(_) => MessageType::NewQuorum,
        }
    }

    /// Serializes the message into its wire envelope.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let content = match self {
            Self::Heartbeat(m) => serde_json::to_value(m)?,
            Self::HeartbeatResponse(m) => serde_json::to_value(m)?,
            Self::PreVoteRequest(m) => serde_json::to_value(m)?,
            Self::PreVoteResponse(m) => serde_json::to_value(m)?,
            Self::VoteRequest(m) => serde_json::to_value(m)?,
            Self::VoteResponse(m) => serde_json::to_value(m)?,
            Self::NewQuorum(m) => serde_json::to_value(m)?,
        };
        let envelope = Envelope {
            message_type: self.message_type() as u8,
            content,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Parses a wire envelope. An unrecognized discriminant yields
    /// [`RaftifyError::UnknownMessageType`]; the caller logs and discards.
    pub fn decode(bytes: &[u8]) -> Result<Message> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        let message_type = MessageType::from_u8(envelope.message_type)
            .ok_or(RaftifyError::UnknownMessageType(envelope.message_type))?;
        let message = match message_type {
            MessageType::Heartbeat => Self::Heartbeat(serde_json::from_value(envelope.content)?),
            MessageType::HeartbeatResponse => {
                Self::HeartbeatResponse(serde_json::from_value(envelope.content)?)
            }
            MessageType::PreVoteRequest => {
                Self::PreVoteRequest(serde_json::from_value(envelope.content)?)
            }
            MessageType::PreVoteResponse => {
                Self::PreVoteResponse(serde_json::from_value(envelope.content)?)
            }
            MessageType::VoteRequest => Self::VoteRequest(serde_json::from_value(envelope.content)?),
            MessageType::VoteResponse => {
                Self::VoteResponse(serde_json::from_value(envelope.content)?)
            }
            MessageType::NewQuorum => Self::NewQuorum(serde_json::from_value(envelope.content)?),
        };
        Ok(message)
    }
}
