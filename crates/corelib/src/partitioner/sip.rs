//! SipHash-1-3 partitioner.

use crate::partitioner::traits::Partitioner;
use crate::partitioner::HashAlgorithm;
use crate::token::{HashSpace, RingToken};
use siphasher::sip::SipHasher13;
use std::hash::Hasher;

/// SipHash-1-3 with the all-zero key, so every process agrees on placement.
#[derive(Clone, Debug)]
pub struct SipPartitioner {
    space: HashSpace,
}

impl SipPartitioner {
    pub fn new(space: HashSpace) -> Self {
        Self { space }
    }
}

impl Partitioner for SipPartitioner {
    fn partition(&self, key: &[u8]) -> RingToken {
        let mut hasher = SipHasher13::new();
        hasher.write(key);
        self.space.truncate(hasher.finish())
    }

    fn space(&self) -> HashSpace {
        self.space
    }

    fn algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Sip13
    }

    fn name(&self) -> &'static str {
        "SipPartitioner"
    }
}
