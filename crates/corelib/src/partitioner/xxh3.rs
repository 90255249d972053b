//! XXH3 partitioner.

use crate::partitioner::traits::Partitioner;
use crate::partitioner::HashAlgorithm;
use crate::token::{HashSpace, RingToken};
use xxhash_rust::xxh3::xxh3_64;

/// Non-cryptographic, fast; distribution is good enough for topic placement.
#[derive(Clone, Debug)]
pub struct Xxh3Partitioner {
    space: HashSpace,
}

impl Xxh3Partitioner {
    pub fn new(space: HashSpace) -> Self {
        Self { space }
    }
}

impl Partitioner for Xxh3Partitioner {
    fn partition(&self, key: &[u8]) -> RingToken {
        self.space.truncate(xxh3_64(key))
    }

    fn space(&self) -> HashSpace {
        self.space
    }

    fn algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Xxh3
    }

    fn name(&self) -> &'static str {
        "Xxh3Partitioner"
    }
}
