//! Wraparound range arithmetic over ring positions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::token::{HashSpace, RingToken};

/// A half-open arc `(start, end]` walked clockwise.
///
/// When `start == end` the arc covers the whole ring; that is what a lone
/// node (its own predecessor) owns.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct RingRange {
    pub start: RingToken,
    pub end: RingToken,
}

impl RingRange {
    pub fn new(start: RingToken, end: RingToken) -> Self {
        Self { start, end }
    }

    /// True if this arc crosses zero, i.e. `end` is the wrap point.
    #[inline]
    pub fn wraps(&self) -> bool {
        self.start > self.end
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.start == self.end
    }

    /// Membership test with modular semantics.
    ///
    /// For a wrapping arc the test is `x > start || x <= end`.
    #[inline]
    pub fn contains(&self, x: RingToken) -> bool {
        if self.is_full() {
            true
        } else if self.wraps() {
            x > self.start || x <= self.end
        } else {
            self.start < x && x <= self.end
        }
    }

    /// Strict interior `(start, end)`; used when placing a joining node,
    /// which must not collide with either endpoint.
    #[inline]
    pub fn contains_open(&self, x: RingToken) -> bool {
        x != self.end && self.contains(x)
    }

    /// Number of positions in the arc.
    pub fn len(&self, space: HashSpace) -> u128 {
        if self.is_full() {
            1u128 << space.bits()
        } else {
            u128::from(space.distance(self.start, self.end))
        }
    }
}

impl fmt::Display for RingRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}]", self.start, self.end)
    }
}
