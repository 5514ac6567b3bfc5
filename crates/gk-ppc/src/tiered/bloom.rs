//! Address-range filters
//!
//! Both filters fold guest cache lines into a single `u64`. They may
//! report overlap for disjoint ranges but never miss a real one.

/// Granule of the invalidation bloom
const BLOOM_LINE_SHIFT: u32 = 6;
/// Granule of the block-presence filter (one L1 cache line)
const PRESENCE_LINE_SHIFT: u32 = 5;

fn fold(address: u32, size: u64, shift: u32) -> u64 {
    if size == 0 {
        return 0;
    }
    let first = (address as u64) >> shift;
    let last = (address as u64 + size - 1) >> shift;
    if last - first >= 63 {
        return u64::MAX;
    }
    (first..=last).fold(0u64, |bits, line| bits | 1 << (line & 63))
}

/// Bloom of the 64-byte lines covered by `[address, address + size)`
#[inline]
pub fn range_bloom(address: u32, size: u64) -> u64 {
    fold(address, size, BLOOM_LINE_SHIFT)
}

/// Bloom of a block of `len` instructions starting at `address`
#[inline]
pub fn block_bloom(address: u32, len: u32) -> u64 {
    range_bloom(address, len as u64 * 4)
}

/// Tracks which 32-byte lines have ever had a block decoded over them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinePresence(u64);

impl LinePresence {
    pub fn mark(&mut self, address: u32, len: u32) {
        self.0 |= fold(address, len as u64 * 4, PRESENCE_LINE_SHIFT);
    }

    pub fn may_contain(&self, address: u32, size: u64) -> bool {
        self.0 & fold(address, size, PRESENCE_LINE_SHIFT) != 0
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

/// Exact test: does `[start, start + len * 4)` intersect `[address, address + size)`?
///
/// `size` must be non-zero.
#[inline]
pub fn overlaps(start: u32, len: u32, address: u32, size: u64) -> bool {
    let first = address as u64;
    let last = first + size - 1;
    let start = start as u64;
    start <= last && start + len as u64 * 4 > first
}
