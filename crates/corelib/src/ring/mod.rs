//! Ring position arithmetic.
//!
//! Ownership on the discovery ring is always expressed as a half-open arc
//! `(predecessor, self]`, evaluated with wraparound.

pub mod position;

pub use position::RingRange;
