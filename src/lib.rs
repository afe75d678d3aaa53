pub mod config;
pub mod error;
pub mod membership;
pub mod message;
pub mod node;
pub mod snapshot;

pub use config::Config;
pub use error::{RaftifyError, Result};
pub use membership::{Member, MemberEvent, Membership};
pub use node::{Node, NodeState};
