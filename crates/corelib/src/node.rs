//! Ring node identities.
//!
//! A ring node is identified by the hash of its advertised `address:port` plus
//! the address itself, which is how peers reach it. Keep this struct small and
//! cheap to clone; it is copied into every chain hop and neighbor update.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::partitioner::Partitioner;
use crate::token::RingToken;

/// Identity of a discovery node on the ring: `(hash, ip, port)`.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct NodeRef {
    pub hash: RingToken,
    pub address: String,
    pub port: u16,
}

impl NodeRef {
    /// Identity with the hash derived from `address:port`.
    pub fn new(address: impl Into<String>, port: u16, partitioner: &dyn Partitioner) -> Self {
        let address = address.into();
        let hash = partitioner.partition_str(&format!("{address}:{port}"));
        Self { hash, address, port }
    }

    /// Identity with an explicit hash; tests and tooling use this to build
    /// rings with known positions.
    pub fn with_hash(hash: u64, address: impl Into<String>, port: u16) -> Self {
        Self {
            hash: RingToken(hash),
            address: address.into(),
            port,
        }
    }

    /// `address:port`, the form used to connect.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Same ring position and same endpoint.
    pub fn same_node(&self, other: &NodeRef) -> bool {
        self.hash == other.hash && self.port == other.port && self.address == other.address
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.hash, self.address, self.port)
    }
}
