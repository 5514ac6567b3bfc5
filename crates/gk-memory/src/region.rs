//! Region flags and address resolution

use bitflags::bitflags;

use crate::constants::*;

bitflags! {
    /// Region protection and attribute flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RegionFlags: u32 {
        /// Region is readable
        const READ    = 0b0001;
        /// Region is writable
        const WRITE   = 0b0010;
        /// Region is executable
        const EXECUTE = 0b0100;
        /// Region is memory-mapped I/O
        const MMIO    = 0b1000;

        /// Read and write access
        const RW  = Self::READ.bits() | Self::WRITE.bits();
        /// Read, write, and execute access
        const RWX = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
    }
}

impl Default for RegionFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Where an effective address lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Offset into MEM1
    Ram(usize),
    /// Offset into the locked L1 cache
    LockedCache(usize),
    /// Physical address inside the hardware register window
    Mmio(u32),
}

impl Region {
    /// Resolve an effective address using the fixed BAT layout games boot with
    pub fn resolve(addr: u32) -> Option<Self> {
        if (LOCKED_CACHE_BASE..LOCKED_CACHE_BASE + LOCKED_CACHE_SIZE).contains(&addr) {
            return Some(Region::LockedCache((addr - LOCKED_CACHE_BASE) as usize));
        }

        let phys = if (CACHED_BASE..LOCKED_CACHE_BASE).contains(&addr) {
            addr & MIRROR_MASK
        } else {
            addr
        };

        if phys < MEM1_BASE + MEM1_SIZE {
            Some(Region::Ram((phys - MEM1_BASE) as usize))
        } else if (MMIO_BASE..MMIO_BASE + MMIO_SIZE).contains(&phys) {
            Some(Region::Mmio(phys))
        } else {
            None
        }
    }

    pub fn flags(self) -> RegionFlags {
        match self {
            Region::Ram(_) => RegionFlags::RWX,
            Region::LockedCache(_) => RegionFlags::RW,
            Region::Mmio(_) => RegionFlags::RW | RegionFlags::MMIO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirrors_resolve_to_same_ram() {
        assert_eq!(Region::resolve(0x8000_1234), Some(Region::Ram(0x1234)));
        assert_eq!(Region::resolve(0xC000_1234), Some(Region::Ram(0x1234)));
        assert_eq!(Region::resolve(0x0000_1234), Some(Region::Ram(0x1234)));
    }

    #[test]
    fn test_mmio_and_locked_cache() {
        assert_eq!(Region::resolve(0xCC00_3000), Some(Region::Mmio(0x0C00_3000)));
        assert_eq!(Region::resolve(0xE000_0010), Some(Region::LockedCache(0x10)));
        assert!(!Region::Mmio(0).flags().contains(RegionFlags::EXECUTE));
    }

    #[test]
    fn test_unmapped() {
        assert_eq!(Region::resolve(0x8180_0000), None);
        assert_eq!(Region::resolve(0xE000_4000), None);
        assert_eq!(Region::resolve(0x7000_0000), None);
    }
}
