//! Partitioner abstraction for the discovery ring.
//!
//! Partitioners are responsible for converting keys into tokens
//! that can be placed on the hash ring.

pub mod blake;
pub mod sip;
pub mod traits;
pub mod xxh3;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::token::HashSpace;

pub use blake::Blake3Partitioner;
pub use sip::SipPartitioner;
pub use traits::Partitioner;
pub use xxh3::Xxh3Partitioner;

/// Digest used to place identities and topics.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[default]
    Blake3,
    Xxh3,
    Sip13,
}

impl HashAlgorithm {
    /// Builds the partitioner for this algorithm over `space`.
    pub fn partitioner(self, space: HashSpace) -> Arc<dyn Partitioner> {
        match self {
            HashAlgorithm::Blake3 => Arc::new(Blake3Partitioner::new(space)),
            HashAlgorithm::Xxh3 => Arc::new(Xxh3Partitioner::new(space)),
            HashAlgorithm::Sip13 => Arc::new(SipPartitioner::new(space)),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Xxh3 => "xxh3",
            HashAlgorithm::Sip13 => "sip13",
        };
        f.write_str(name)
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blake3" => Ok(HashAlgorithm::Blake3),
            "xxh3" => Ok(HashAlgorithm::Xxh3),
            "sip13" | "sip" => Ok(HashAlgorithm::Sip13),
            other => Err(Error::UnknownAlgorithm(other.to_string())),
        }
    }
}
