//! Dispatch cache
//!
//! A direct-mapped primary table backed by a small set-associative
//! victim cache. Entries are plain 16-byte records; an all-zero entry
//! is empty, so invalidation is a single zero write.

use bytemuck::{Pod, Zeroable};

/// log2 of the primary table size
pub const PRIMARY_BITS: u32 = 16;
/// log2 of the number of victim sets
pub const VICTIM_SET_BITS: u32 = 10;

const PRIMARY_MASK: u32 = (1 << PRIMARY_BITS) - 1;
const VICTIM_SET_MASK: usize = (1 << VICTIM_SET_BITS) - 1;

/// Low address bits tagging an interpreter block
pub const TAG_INTERPRETER: u32 = 0b01;
/// Low address bits tagging a compiled block
pub const TAG_COMPILED: u32 = 0b10;
const TAG_MASK: u32 = 0b11;

/// One cache slot.
///
/// Interpreter blocks: `offset` indexes the instruction store and
/// `extra` packs the length (low half) and use count (high half).
/// Compiled blocks: `offset` indexes the compiled-block slab and
/// `extra` is the block's bloom.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchEntry {
    pub address: u32,
    pub offset: u32,
    pub extra: u64,
}

impl DispatchEntry {
    pub fn interpreter(address: u32, offset: u32, len: u32) -> Self {
        debug_assert_eq!(address & TAG_MASK, 0, "unaligned block 0x{address:08x}");
        Self {
            address: address | TAG_INTERPRETER,
            offset,
            extra: len as u64,
        }
    }

    pub fn compiled(address: u32, slot: u32, bloom: u64) -> Self {
        debug_assert_eq!(address & TAG_MASK, 0, "unaligned block 0x{address:08x}");
        Self {
            address: address | TAG_COMPILED,
            offset: slot,
            extra: bloom,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.address != 0
    }

    #[inline]
    pub fn guest_address(&self) -> u32 {
        self.address & !TAG_MASK
    }

    #[inline]
    pub fn is_interpreter(&self) -> bool {
        self.address & TAG_MASK == TAG_INTERPRETER
    }

    #[inline]
    pub fn is_compiled(&self) -> bool {
        self.address & TAG_MASK == TAG_COMPILED
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.extra as u32
    }

    #[inline]
    pub fn usecount(&self) -> u32 {
        (self.extra >> 32) as u32
    }

    pub fn set_len(&mut self, len: u32) {
        self.extra = (self.extra & !0xFFFF_FFFF) | len as u64;
    }

    pub fn bump_usecount(&mut self) {
        let count = self.usecount().saturating_add(1);
        self.extra = (self.extra & 0xFFFF_FFFF) | (count as u64) << 32;
    }

    #[inline]
    pub fn bloom(&self) -> u64 {
        self.extra
    }

    pub fn invalidate(&mut self) {
        *self = Self::zeroed();
    }
}

#[inline]
pub fn primary_index(address: u32) -> usize {
    (((address >> 2) ^ (address >> 18)) & PRIMARY_MASK) as usize
}

#[inline]
fn victim_set(address: u32) -> usize {
    primary_index(address) & VICTIM_SET_MASK
}

/// How a lookup was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Primary,
    /// Found in the victim cache and swapped back into the primary slot
    Victim,
}

#[derive(Debug)]
pub struct DispatchCache {
    primary: Vec<DispatchEntry>,
    victim: Vec<DispatchEntry>,
    /// Second-chance bit per victim way
    referenced: Vec<bool>,
    /// Clock hand per victim set
    hands: Vec<u8>,
    ways: usize,
}

impl DispatchCache {
    pub fn new(ways: usize) -> Self {
        let ways = ways.clamp(1, u8::MAX as usize);
        let sets = 1usize << VICTIM_SET_BITS;
        Self {
            primary: vec![DispatchEntry::zeroed(); 1 << PRIMARY_BITS],
            victim: vec![DispatchEntry::zeroed(); sets * ways],
            referenced: vec![false; sets * ways],
            hands: vec![0; sets],
            ways,
        }
    }

    pub fn ways(&self) -> usize {
        self.ways
    }

    /// Find the entry for `address`, promoting a victim hit to the primary table.
    ///
    /// Returns the primary index now holding the entry.
    pub fn find(&mut self, address: u32) -> Option<(usize, Probe)> {
        let index = primary_index(address);
        if self.primary[index].is_valid() && self.primary[index].guest_address() == address {
            return Some((index, Probe::Primary));
        }

        let base = victim_set(address) * self.ways;
        let way = (0..self.ways).find(|&w| {
            let entry = &self.victim[base + w];
            entry.is_valid() && entry.guest_address() == address
        })?;

        // Swap: the displaced primary entry takes the victim way
        std::mem::swap(&mut self.primary[index], &mut self.victim[base + way]);
        self.referenced[base + way] = self.victim[base + way].is_valid();
        Some((index, Probe::Victim))
    }

    /// Look up without touching reference bits or moving entries
    pub fn peek(&self, address: u32) -> Option<&DispatchEntry> {
        let index = primary_index(address);
        let entry = &self.primary[index];
        if entry.is_valid() && entry.guest_address() == address {
            return Some(entry);
        }
        let base = victim_set(address) * self.ways;
        self.victim[base..base + self.ways]
            .iter()
            .find(|e| e.is_valid() && e.guest_address() == address)
    }

    /// Install an entry in its primary slot, moving a valid occupant to the victim cache.
    pub fn insert(&mut self, entry: DispatchEntry) -> usize {
        let index = primary_index(entry.guest_address());
        let displaced = std::mem::replace(&mut self.primary[index], entry);
        if displaced.is_valid() && displaced.guest_address() != entry.guest_address() {
            self.insert_victim(displaced);
        }
        index
    }

    /// WS-Clock replacement within the displaced entry's set
    fn insert_victim(&mut self, entry: DispatchEntry) {
        let set = victim_set(entry.guest_address());
        let base = set * self.ways;
        let way = loop {
            let hand = self.hands[set] as usize;
            self.hands[set] = ((hand + 1) % self.ways) as u8;
            let slot = base + hand;
            if !self.victim[slot].is_valid() || !self.referenced[slot] {
                break slot;
            }
            self.referenced[slot] = false;
        };
        self.victim[way] = entry;
        self.referenced[way] = true;
    }

    #[inline]
    pub fn entry(&self, index: usize) -> &DispatchEntry {
        &self.primary[index]
    }

    #[inline]
    pub fn entry_mut(&mut self, index: usize) -> &mut DispatchEntry {
        &mut self.primary[index]
    }

    /// Drop any entry for `address`, primary or victim
    pub fn remove(&mut self, address: u32) {
        let index = primary_index(address);
        if self.primary[index].is_valid() && self.primary[index].guest_address() == address {
            self.primary[index].invalidate();
        }
        let base = victim_set(address) * self.ways;
        for entry in &mut self.victim[base..base + self.ways] {
            if entry.is_valid() && entry.guest_address() == address {
                entry.invalidate();
            }
        }
    }

    /// Every slot, primary then victim
    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut DispatchEntry> {
        self.primary.iter_mut().chain(self.victim.iter_mut())
    }

    pub fn entries(&self) -> impl Iterator<Item = &DispatchEntry> {
        self.primary.iter().chain(self.victim.iter())
    }

    pub fn clear(&mut self) {
        bytemuck::fill_zeroes(&mut self.primary);
        bytemuck::fill_zeroes(&mut self.victim);
        self.referenced.fill(false);
        self.hands.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Distinct addresses sharing primary slot 0x0040
    fn colliding(n: u32) -> u32 {
        (0x40 << 2) | (n << 18) | ((n & 0x3FFF) << 2)
    }

    #[test]
    fn test_entry_layout() {
        assert_eq!(std::mem::size_of::<DispatchEntry>(), 16);
        assert_eq!(std::mem::align_of::<DispatchEntry>(), 16);
        let mut e = DispatchEntry::interpreter(0x8000_1000, 7, 12);
        assert!(e.is_interpreter());
        assert_eq!(e.guest_address(), 0x8000_1000);
        e.bump_usecount();
        e.bump_usecount();
        e.set_len(13);
        assert_eq!((e.len(), e.usecount()), (13, 2));
        e.invalidate();
        assert!(!e.is_valid());
    }

    #[test]
    fn test_colliding_helper() {
        for n in 1..4 {
            assert_eq!(primary_index(colliding(n)), primary_index(colliding(1)));
        }
        assert_ne!(colliding(1), colliding(2));
    }

    #[test]
    fn test_victim_hit_swaps_back() {
        let mut cache = DispatchCache::new(4);
        let (a, b) = (colliding(1), colliding(2));
        cache.insert(DispatchEntry::interpreter(a, 0, 1));
        cache.insert(DispatchEntry::interpreter(b, 1, 1));

        assert_eq!(cache.find(b).map(|(_, p)| p), Some(Probe::Primary));
        let (index, probe) = cache.find(a).unwrap();
        assert_eq!(probe, Probe::Victim);
        assert_eq!(cache.entry(index).guest_address(), a);
        // b now sits in the victim cache
        assert_eq!(cache.find(b).map(|(_, p)| p), Some(Probe::Victim));
    }

    #[test]
    fn test_victim_set_evicts_when_full() {
        let mut cache = DispatchCache::new(2);
        for n in 1..=4 {
            cache.insert(DispatchEntry::interpreter(colliding(n), n, 1));
        }
        let live = (1..=4).filter(|&n| cache.peek(colliding(n)).is_some()).count();
        // One primary plus two victim ways
        assert_eq!(live, 3);
        assert!(cache.peek(colliding(4)).is_some());
    }

    #[test]
    fn test_remove_and_clear() {
        let mut cache = DispatchCache::new(4);
        let (a, b) = (colliding(1), colliding(2));
        cache.insert(DispatchEntry::interpreter(a, 0, 1));
        cache.insert(DispatchEntry::interpreter(b, 1, 1));
        cache.remove(a);
        assert!(cache.peek(a).is_none());
        assert!(cache.peek(b).is_some());
        cache.clear();
        assert!(cache.entries().all(|e| !e.is_valid()));
    }
}
