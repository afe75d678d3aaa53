//! Gossip frame codec.
//!
//! Frames are JSON-serialized and, when the cluster is configured with a
//! pre-shared key, prefixed with an HMAC-SHA256 tag over the serialized
//! body. Frames with a missing or invalid tag are dropped before they
//! reach any protocol logic.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{RaftifyError, Result};
use crate::membership::Member;

type HmacSha256 = Hmac<Sha256>;

const TAG_LEN: usize = 32;

/// Messages exchanged by the gossip layer itself plus the two user-payload
/// carriers the node protocol rides on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) enum Frame {
    /// Liveness probe.
    Ping { seq: u64, from: String },
    /// Reply to a probe.
    Ack { seq: u64, from: String },
    /// Request to join the cluster via this peer.
    Join { from: Member },
    /// Full state transfer answering a join.
    JoinAck { from: String, members: Vec<Member> },
    /// Periodic anti-entropy push of the full alive list.
    Sync { from: String, members: Vec<Member> },
    /// Voluntary departure announcement.
    Leave { from: String },
    /// Best-effort application payload.
    Message { from: String, payload: Vec<u8> },
    /// Acked application payload; retransmitted until `DeliveryAck`.
    Delivery { seq: u64, from: String, payload: Vec<u8> },
    /// Acknowledges a `Delivery`.
    DeliveryAck { seq: u64, from: String },
}

impl Frame {
    /// The sender name carried inside the frame.
    pub(super) fn from(&self) -> &str {
        match self {
            Frame::Ping { from, .. }
            | Frame::Ack { from, .. }
            | Frame::JoinAck { from, .. }
            | Frame::Sync { from, .. }
            | Frame::Leave { from }
            | Frame::Message { from, .. }
            | Frame::Delivery { from, .. }
            | Frame::DeliveryAck { from, .. } => from,
            Frame::Join { from } => &from.name,
        }
    }
}

fn tag(key: &[u8], body: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| RaftifyError::InvalidConfig(format!("invalid frame key: {e}")))?;
    mac.update(body);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Serializes a frame, prepending an authentication tag when a key is set.
pub(super) fn encode(frame: &Frame, key: Option<&[u8]>) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(frame)?;
    match key {
        Some(key) => {
            let mut out = tag(key, &body)?;
            out.extend_from_slice(&body);
            Ok(out)
        }
        None => Ok(body),
    }
}

/// Parses a frame, verifying the authentication tag when a key is set.
pub(super) fn decode(buf: &[u8], key: Option<&[u8]>) -> Result<Frame> {
    let body = match key {
        Some(key) => {
            if buf.len() < TAG_LEN {
                return Err(RaftifyError::FrameRejected(
                    "shorter than its authentication tag".to_string(),
                ));
            }
            let (received, body) = buf.split_at(TAG_LEN);
            let mut mac = HmacSha256::new_from_slice(key)
                .map_err(|e| RaftifyError::InvalidConfig(format!("invalid frame key: {e}")))?;
            mac.update(body);
            mac.verify_slice(received).map_err(|_| {
                RaftifyError::FrameRejected("failed authentication".to_string())
            })?;
            body
        }
        None => buf,
    };
    Ok(serde_json::from_slice(body)?)
}
