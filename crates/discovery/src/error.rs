//! Error types for discovery nodes.

use protocol::{MsgType, TransportError};
use thiserror::Error;

use crate::failover::CoordinatorError;

pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Ring(#[from] corelib::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The bootstrap peer refused this node. Startup-fatal.
    #[error("join rejected: {0}")]
    JoinRejected(String),

    #[error("unexpected reply {0:?}")]
    UnexpectedReply(MsgType),

    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("event loop has stopped")]
    Stopped,
}
