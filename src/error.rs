use thiserror::Error;

#[derive(Error, Debug)]
pub enum RaftifyError {
    #[error("invalid configuration:\n{0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("unknown cluster member: {0}")]
    UnknownMember(String),

    #[error("gossip frame rejected: {0}")]
    FrameRejected(String),

    #[error("none of the configured peers could be reached")]
    NoPeersReached,

    #[error("send to {peer} failed: {reason}")]
    SendFailed { peer: String, reason: String },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("node shut down before bootstrap completed")]
    BootstrapInterrupted,

    #[error("node is already shut down")]
    AlreadyShutdown,

    #[error("errors during shutdown:\n{0}")]
    ShutdownErrors(String),
}

pub type Result<T> = std::result::Result<T, RaftifyError>;
