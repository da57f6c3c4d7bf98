mod bit_reversed;

pub use self::bit_reversed::BitReversedSpace;

use crate::error::Result;

/// Enumerate every buffer of `width` bytes, lazily and in bit-reversed order.
pub fn enumerate(width: usize) -> Result<BitReversedSpace> {
    BitReversedSpace::new(width)
}
