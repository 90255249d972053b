//! Core library for the topic discovery ring.
//!
//! This crate provides the fundamental abstractions shared by every ring
//! participant:
//! - Ring tokens and the fixed-width hash space
//! - Partitioner algorithms (key -> token)
//! - Wraparound range arithmetic
//! - Node identities
//! - An offline topology view (ownership, finger tables)

pub mod error;
pub mod node;
pub mod partitioner;
pub mod ring;
pub mod token;
pub mod topology;

pub use error::{Error, Result};
pub use node::NodeRef;
pub use partitioner::{HashAlgorithm, Partitioner};
pub use ring::RingRange;
pub use token::{HashSpace, RingToken};
pub use topology::{Finger, Topology};
