//! Error types for the wire protocol.

use std::time::Duration;

use thiserror::Error;

/// Frame encoding and decoding failures. All of these are protocol errors:
/// fatal to the request, never to the node.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("unknown wire format tag {0}")]
    UnknownFormat(u8),

    #[error("empty frame")]
    EmptyFrame,

    #[error("bincode payload: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("json payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures talking to a remote node.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("connection closed by peer")]
    Closed,

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// Every attempt allowed by the retry policy failed.
    #[error("{addr} unreachable after {attempts} attempts: {last}")]
    Exhausted {
        addr: String,
        attempts: u32,
        last: String,
    },
}
