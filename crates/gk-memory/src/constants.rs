//! GameCube memory map constants

/// Main memory (MEM1) physical base
pub const MEM1_BASE: u32 = 0x0000_0000;
/// Main memory size (24 MB)
pub const MEM1_SIZE: u32 = 0x0180_0000;

/// Cached mirror of physical memory
pub const CACHED_BASE: u32 = 0x8000_0000;
/// Uncached mirror of physical memory
pub const UNCACHED_BASE: u32 = 0xC000_0000;
/// Mask applied to addresses in the mirrored segments
pub const MIRROR_MASK: u32 = 0x1FFF_FFFF;

/// Hardware register window (physical)
pub const MMIO_BASE: u32 = 0x0C00_0000;
/// Hardware register window size
pub const MMIO_SIZE: u32 = 0x0001_0000;

/// Locked L1 data cache, as mapped by games
pub const LOCKED_CACHE_BASE: u32 = 0xE000_0000;
/// Locked L1 size (16 KB)
pub const LOCKED_CACHE_SIZE: u32 = 0x0000_4000;

/// Cache line size used by dcbz and icbi
pub const CACHE_LINE_SIZE: u32 = 32;
