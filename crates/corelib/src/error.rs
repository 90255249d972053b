//! Error types for the core library.

use thiserror::Error;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Hash width outside `1..=64`
    #[error("invalid hash width: {0} bits (expected 1..=64)")]
    InvalidHashWidth(u8),
    /// Unrecognized digest name
    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),
    /// Two ring members hash to the same position
    #[error("hash collision at {token} between {first} and {second}")]
    HashCollision {
        token: u64,
        first: String,
        second: String,
    },
    /// Topology operation on an empty ring
    #[error("topology has no nodes")]
    EmptyTopology,
}
