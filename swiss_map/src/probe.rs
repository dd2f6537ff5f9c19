//! Quadratic probing over the groups of a table.

/// Sequence of group offsets visited when looking for a key.
///
/// Offsets advance by triangular numbers: `p(i) = (h1 + i * (i + 1) / 2) mod n`. For a power of
/// two `n` the first `n` offsets are a permutation of `0..n`, so every group is visited exactly
/// once before the sequence repeats.
#[derive(Clone, Debug)]
pub struct ProbeSeq {
    mask: usize,
    offset: usize,
    index: usize,
}

impl ProbeSeq {
    /// Starts probing at `h1 mod (mask + 1)`; `mask + 1` must be a power of two.
    #[inline(always)]
    pub fn new(h1: u64, mask: usize) -> Self {
        debug_assert!((mask + 1).is_power_of_two());
        Self {
            mask,
            offset: h1 as usize & mask,
            index: 0,
        }
    }
}

impl Iterator for ProbeSeq {
    type Item = usize;

    #[inline(always)]
    fn next(&mut self) -> Option<usize> {
        let offset = self.offset;
        self.index += 1;
        self.offset = (self.offset + self.index) & self.mask;
        Some(offset)
    }
}
