//! Token abstraction for the discovery ring.
//!
//! Every ring node identity and every topic name is mapped onto a position in
//! a fixed-width hash space `[0, 2^B)`. All nodes in one deployment must agree
//! on `B`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A position on the ring.
///
/// Newtype over `u64` so widths up to 64 bits fit; values are always below
/// the owning [`HashSpace`]'s size.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize)]
pub struct RingToken(pub u64);

impl RingToken {
    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RingToken {
    fn from(value: u64) -> Self {
        RingToken(value)
    }
}

/// The `[0, 2^bits)` integer domain identities and topics are hashed into.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct HashSpace {
    bits: u8,
}

impl HashSpace {
    /// Largest supported width.
    pub const MAX_BITS: u8 = 64;

    /// Creates a hash space of the given width.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHashWidth`] unless `1 <= bits <= 64`.
    pub fn new(bits: u8) -> Result<Self> {
        if bits == 0 || bits > Self::MAX_BITS {
            return Err(Error::InvalidHashWidth(bits));
        }
        Ok(Self { bits })
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Largest token value in this space.
    pub fn max_token(&self) -> RingToken {
        RingToken(self.mask())
    }

    /// Reduces a raw 64-bit digest prefix to this width by keeping the top bits.
    #[inline]
    pub fn truncate(&self, raw: u64) -> RingToken {
        if self.bits == 64 {
            RingToken(raw)
        } else {
            RingToken(raw >> (64 - u32::from(self.bits)))
        }
    }

    /// Wraps an arbitrary value into the space (`value mod 2^bits`).
    #[inline]
    pub fn wrap(&self, value: u128) -> RingToken {
        RingToken((value & u128::from(self.mask())) as u64)
    }

    /// Clockwise distance from `from` to `to`.
    pub fn distance(&self, from: RingToken, to: RingToken) -> u64 {
        to.0.wrapping_sub(from.0) & self.mask()
    }

    /// `token + offset`, wrapping around the ring.
    pub fn offset(&self, token: RingToken, offset: u64) -> RingToken {
        self.wrap(u128::from(token.0) + u128::from(offset))
    }

    fn mask(&self) -> u64 {
        if self.bits == 64 {
            u64::MAX
        } else {
            (1u64 << self.bits) - 1
        }
    }
}

impl Default for HashSpace {
    fn default() -> Self {
        Self { bits: 48 }
    }
}
