//! Core partitioner trait definitions.

use crate::token::{HashSpace, RingToken};

use super::HashAlgorithm;

/// A partitioner converts keys (node addresses, topic names) into ring tokens.
///
/// Partitioners are stateless and thread-safe. Two partitioners produce
/// identical placements only if both their algorithm and their hash space
/// match, which is what ring nodes compare when one joins another.
pub trait Partitioner: Send + Sync + 'static {
    /// Converts a key into a token.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to partition
    ///
    /// # Returns
    ///
    /// A token in `[0, 2^bits)`
    fn partition(&self, key: &[u8]) -> RingToken;

    /// The hash space tokens are drawn from.
    fn space(&self) -> HashSpace;

    /// The digest algorithm in use.
    fn algorithm(&self) -> HashAlgorithm;

    /// Returns the name of this partitioner.
    fn name(&self) -> &'static str;

    /// Convenience wrapper for string keys.
    fn partition_str(&self, key: &str) -> RingToken {
        self.partition(key.as_bytes())
    }
}
