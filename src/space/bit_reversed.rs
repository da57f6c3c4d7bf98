use crate::error::{Error, Result};

/// Every buffer of a fixed width, in bit-reversed counting order.
///
/// Conceptually this counts through all binary strings of `8 * width`
/// characters (last character fastest), reverses each string and cuts it
/// into bytes. Output byte `k` is therefore byte `k` of a little-endian
/// counter with its bits reversed, which is how it is computed here.
#[derive(Debug, Clone)]
pub struct BitReversedSpace {
    counter: Vec<u8>,
    done: bool,
}

impl BitReversedSpace {
    pub fn new(width: usize) -> Result<Self> {
        if width == 0 {
            return Err(Error::InvalidWidth { what: "enumeration" });
        }
        Ok(Self {
            counter: vec![0; width],
            done: false,
        })
    }

    /// Start at the `index`-th buffer of the sequence. An index past the end
    /// of the space yields an already exhausted iterator.
    pub fn starting_at(width: usize, index: u128) -> Result<Self> {
        let mut space = Self::new(width)?;
        let mut rest = index;
        for byte in space.counter.iter_mut() {
            *byte = (rest & 0xff) as u8;
            rest >>= 8;
        }
        space.done = rest != 0;
        Ok(space)
    }

    /// Number of buffers of `width` bytes, when it fits in a `u128`.
    pub fn space_size(width: usize) -> Option<u128> {
        let bits = u32::try_from(width.checked_mul(8)?).ok()?;
        1u128.checked_shl(bits)
    }

    fn remaining(&self) -> Option<usize> {
        if self.done {
            return Some(0);
        }
        let total = Self::space_size(self.counter.len())?;
        let position = self
            .counter
            .iter()
            .rev()
            .try_fold(0u128, |acc, &b| acc.checked_mul(256).map(|v| v | u128::from(b)))?;
        usize::try_from(total - position).ok()
    }

    fn increment(&mut self) {
        for byte in self.counter.iter_mut() {
            let (next, carry) = byte.overflowing_add(1);
            *byte = next;
            if !carry {
                return;
            }
        }
        self.done = true;
    }
}

impl Iterator for BitReversedSpace {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        if self.done {
            return None;
        }
        let buffer = self.counter.iter().map(|b| b.reverse_bits()).collect();
        self.increment();
        Some(buffer)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.remaining() {
            Some(n) => (n, Some(n)),
            None => (usize::MAX, None),
        }
    }
}
