//! BLAKE3 partitioner (default).

use crate::partitioner::traits::Partitioner;
use crate::partitioner::HashAlgorithm;
use crate::token::{HashSpace, RingToken};

/// Cryptographic digest truncated to the configured width.
///
/// The first eight digest bytes are read big-endian and the top `bits` are kept.
#[derive(Clone, Debug)]
pub struct Blake3Partitioner {
    space: HashSpace,
}

impl Blake3Partitioner {
    pub fn new(space: HashSpace) -> Self {
        Self { space }
    }
}

impl Partitioner for Blake3Partitioner {
    fn partition(&self, key: &[u8]) -> RingToken {
        let digest = blake3::hash(key);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest.as_bytes()[..8]);
        self.space.truncate(u64::from_be_bytes(prefix))
    }

    fn space(&self) -> HashSpace {
        self.space
    }

    fn algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Blake3
    }

    fn name(&self) -> &'static str {
        "Blake3Partitioner"
    }
}
