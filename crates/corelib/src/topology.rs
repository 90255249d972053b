//! Ring topology abstractions.
//!
//! `Topology` is a global, offline view over a set of ring members: who owns
//! which arc, where a key lands, and the Chord-style finger table of each
//! node. Live ring nodes never hold one (each only knows its two neighbors);
//! it exists for inspection tooling and as the oracle that tests compare the
//! distributed ring against.

use crate::error::{Error, Result};
use crate::node::NodeRef;
use crate::ring::RingRange;
use crate::token::{HashSpace, RingToken};

/// One finger table entry: the owner of `start = node + 2^i`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finger {
    pub start: RingToken,
    pub node: NodeRef,
}

/// Sorted view of ring members.
#[derive(Debug, Clone)]
pub struct Topology {
    space: HashSpace,
    nodes: Vec<NodeRef>,
}

impl Topology {
    /// Builds a topology, sorting members by hash.
    ///
    /// # Errors
    ///
    /// [`Error::HashCollision`] if two distinct endpoints share a position.
    pub fn new(space: HashSpace, nodes: impl IntoIterator<Item = NodeRef>) -> Result<Self> {
        let mut nodes: Vec<NodeRef> = nodes.into_iter().collect();
        nodes.sort_by_key(|n| n.hash);
        nodes.dedup_by(|a, b| a.same_node(b));
        if let Some(pair) = nodes.windows(2).find(|w| w[0].hash == w[1].hash) {
            return Err(Error::HashCollision {
                token: pair[0].hash.value(),
                first: pair[0].endpoint(),
                second: pair[1].endpoint(),
            });
        }
        Ok(Self { space, nodes })
    }

    pub fn space(&self) -> HashSpace {
        self.space
    }

    pub fn nodes(&self) -> &[NodeRef] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The node owning `token`: the first member clockwise at or after it.
    pub fn owner_of(&self, token: RingToken) -> Option<&NodeRef> {
        if self.nodes.is_empty() {
            return None;
        }
        let idx = self.nodes.partition_point(|n| n.hash < token);
        Some(&self.nodes[idx % self.nodes.len()])
    }

    /// Next member clockwise after the member at `hash`.
    pub fn successor_of(&self, hash: RingToken) -> Option<&NodeRef> {
        let idx = self.index_of(hash)?;
        Some(&self.nodes[(idx + 1) % self.nodes.len()])
    }

    /// Previous member counter-clockwise before the member at `hash`.
    pub fn predecessor_of(&self, hash: RingToken) -> Option<&NodeRef> {
        let idx = self.index_of(hash)?;
        let len = self.nodes.len();
        Some(&self.nodes[(idx + len - 1) % len])
    }

    /// The arc `(predecessor, node]` owned by the member at `hash`.
    pub fn owned_range(&self, hash: RingToken) -> Option<RingRange> {
        let pred = self.predecessor_of(hash)?;
        Some(RingRange::new(pred.hash, hash))
    }

    /// Every member with its owned arc, in ring order.
    pub fn owned_ranges(&self) -> Vec<(NodeRef, RingRange)> {
        self.nodes
            .iter()
            .filter_map(|n| self.owned_range(n.hash).map(|r| (n.clone(), r)))
            .collect()
    }

    /// Chord finger table for the member at `hash`; entry `i` is the owner
    /// of `hash + 2^i`, for `i` in `0..bits`.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyTopology`] if `hash` is not a member.
    pub fn finger_table(&self, hash: RingToken) -> Result<Vec<Finger>> {
        if self.index_of(hash).is_none() {
            return Err(Error::EmptyTopology);
        }
        let mut fingers = Vec::with_capacity(usize::from(self.space.bits()));
        for i in 0..u32::from(self.space.bits()) {
            let start = self.space.offset(hash, 1u64 << i);
            // Non-empty: `hash` itself is a member.
            if let Some(node) = self.owner_of(start) {
                fingers.push(Finger {
                    start,
                    node: node.clone(),
                });
            }
        }
        Ok(fingers)
    }

    fn index_of(&self, hash: RingToken) -> Option<usize> {
        self.nodes.binary_search_by_key(&hash, |n| n.hash).ok()
    }
}
