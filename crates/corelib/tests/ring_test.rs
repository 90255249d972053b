//! Integration tests for ring placement.
//!
//! # Test Strategy
//!
//! 1. **Basic functionality**: hashing node endpoints and topics into a space
//! 2. **Ownership**: every token owned by exactly one member
//! 3. **Edge cases**: wraparound, single member, full-width space

use corelib::node::NodeRef;
use corelib::partitioner::HashAlgorithm;
use corelib::ring::RingRange;
use corelib::token::{HashSpace, RingToken};
use corelib::topology::Topology;
use proptest::prelude::*;

// ============================================================================
// Basic Functionality Tests
// ============================================================================

#[test]
fn test_nodes_hash_into_space() {
    let space = HashSpace::new(16).unwrap();
    let partitioner = HashAlgorithm::Blake3.partitioner(space);
    let nodes: Vec<NodeRef> = (0..8)
        .map(|i| NodeRef::new("10.0.0.1", 5000 + i, partitioner.as_ref()))
        .collect();
    for node in &nodes {
        assert!(node.hash.value() < 1 << 16);
    }
    let topology = Topology::new(space, nodes).unwrap();
    assert_eq!(topology.len(), 8);
}

#[test]
fn test_topic_lands_on_owner_range() {
    let space = HashSpace::new(8).unwrap();
    let partitioner = HashAlgorithm::Blake3.partitioner(space);
    let topology = Topology::new(
        space,
        [10u64, 90, 200].map(|h| NodeRef::with_hash(h, "127.0.0.1", h as u16)),
    )
    .unwrap();

    for topic in ["weather", "humidity", "airquality", "light", "pressure"] {
        let token = partitioner.partition_str(topic);
        let owner = topology.owner_of(token).unwrap();
        let range = topology.owned_range(owner.hash).unwrap();
        assert!(range.contains(token), "{topic} -> {token} not in {range}");
    }
}

// ============================================================================
// Edge Cases
// ============================================================================

#[test]
fn test_wrap_point_owns_top_and_bottom() {
    let space = HashSpace::new(8).unwrap();
    let topology = Topology::new(
        space,
        [10u64, 90, 200].map(|h| NodeRef::with_hash(h, "127.0.0.1", h as u16)),
    )
    .unwrap();
    let wrap = topology.owned_range(RingToken(10)).unwrap();
    assert_eq!(wrap, RingRange::new(RingToken(200), RingToken(10)));
    assert!(wrap.wraps());
    assert_eq!(topology.owner_of(RingToken(255)).unwrap().hash, RingToken(10));
    assert_eq!(topology.owner_of(RingToken(3)).unwrap().hash, RingToken(10));
}

#[test]
fn test_full_width_space() {
    let space = HashSpace::new(64).unwrap();
    let topology = Topology::new(
        space,
        vec![
            NodeRef::with_hash(u64::MAX, "a", 1),
            NodeRef::with_hash(0, "b", 2),
        ],
    )
    .unwrap();
    let total: u128 = topology
        .owned_ranges()
        .iter()
        .map(|(_, r)| r.len(space))
        .sum();
    assert_eq!(total, 1u128 << 64);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_ranges_partition_space(hashes in prop::collection::btree_set(0u64..256, 1..24)) {
        let space = HashSpace::new(8).unwrap();
        let nodes = hashes.iter().map(|&h| NodeRef::with_hash(h, "127.0.0.1", h as u16));
        let topology = Topology::new(space, nodes).unwrap();
        let ranges = topology.owned_ranges();

        let total: u128 = ranges.iter().map(|(_, r)| r.len(space)).sum();
        prop_assert_eq!(total, 256);

        for x in 0u64..256 {
            let owners = ranges.iter().filter(|(_, r)| r.contains(RingToken(x))).count();
            prop_assert_eq!(owners, 1, "token {} owned {} times", x, owners);
            let owner = topology.owner_of(RingToken(x)).unwrap();
            let owner_range = topology.owned_range(owner.hash).unwrap();
            prop_assert!(owner_range.contains(RingToken(x)));
        }
    }
}
