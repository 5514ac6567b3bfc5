//! Tests for the GameCube address map

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use gk_memory::{constants::*, GuestMemory, Memory, MemoryError, MmioDevice, RegionFlags};

#[test]
fn test_address_space_boundaries() {
    let mem = GuestMemory::new();

    let addr = MEM1_BASE;
    mem.write_be32(addr, 0xDEADBEEF).unwrap();
    assert_eq!(mem.read_be32(addr).unwrap(), 0xDEADBEEF);

    // Upper boundary of MEM1
    let addr = MEM1_BASE + MEM1_SIZE - 4;
    mem.write_be32(addr, 0xCAFEBABE).unwrap();
    assert_eq!(mem.read_be32(addr).unwrap(), 0xCAFEBABE);

    // One past the end is unmapped
    assert_eq!(
        mem.read_be32(MEM1_BASE + MEM1_SIZE),
        Err(MemoryError::Unmapped { addr: MEM1_SIZE })
    );
}

#[test]
fn test_access_crossing_region_end() {
    let mem = GuestMemory::new();
    let addr = CACHED_BASE + MEM1_SIZE - 2;

    assert_eq!(
        mem.read_be32(addr),
        Err(MemoryError::OutOfBounds { addr, len: 4 })
    );
    assert!(mem.write_be64(addr, 0).is_err());
}

#[test]
fn test_writability_matches_stores() {
    let mem = GuestMemory::new();
    let top = CACHED_BASE + MEM1_SIZE;

    assert!(mem.is_writable(top - 4, 4));
    assert!(!mem.is_writable(top - 2, 4));
    assert!(!mem.is_writable(top, 4));
    assert!(mem.write_be32(top, 0).is_err());
    assert!(mem.is_writable(LOCKED_CACHE_BASE + LOCKED_CACHE_SIZE - 8, 8));
    assert!(!mem.is_writable(LOCKED_CACHE_BASE + LOCKED_CACHE_SIZE, 1));
    assert!(mem.is_writable(UNCACHED_BASE + MMIO_BASE, 4));
}

#[test]
fn test_mirrors_share_storage() {
    let mem = GuestMemory::new();

    mem.write_be32(CACHED_BASE + 0x3100, 0x11223344).unwrap();
    assert_eq!(mem.read_be32(UNCACHED_BASE + 0x3100).unwrap(), 0x11223344);
    assert_eq!(mem.read_be32(0x3100).unwrap(), 0x11223344);
}

#[test]
fn test_locked_cache_is_separate() {
    let mem = GuestMemory::new();

    mem.write_be32(LOCKED_CACHE_BASE, 0x55555555).unwrap();
    assert_eq!(mem.read_be32(LOCKED_CACHE_BASE).unwrap(), 0x55555555);
    assert_eq!(mem.read_be32(0).unwrap(), 0);
    assert_eq!(mem.region_flags(LOCKED_CACHE_BASE), RegionFlags::RW);
}

#[test]
fn test_unaligned_access() {
    let mem = GuestMemory::new();
    let addr = CACHED_BASE + 1;

    mem.write_be32(addr, 0x12345678).unwrap();
    assert_eq!(mem.read_be32(addr).unwrap(), 0x12345678);

    mem.write_be64(addr, 0xDEADBEEFCAFEBABE).unwrap();
    assert_eq!(mem.read_be64(addr).unwrap(), 0xDEADBEEFCAFEBABE);
}

#[test]
fn test_big_endian_operations() {
    let mem = GuestMemory::new();
    let addr = CACHED_BASE + 0x1000;

    mem.write_be16(addr, 0x1234).unwrap();
    assert_eq!(mem.read_be16(addr).unwrap(), 0x1234);
    assert_eq!(mem.read_u8(addr).unwrap(), 0x12);
    assert_eq!(mem.read_u8(addr + 1).unwrap(), 0x34);

    mem.write_be32(addr + 2, 0x12345678).unwrap();
    assert_eq!(mem.read_be32(addr + 2).unwrap(), 0x12345678);

    mem.write_be64(addr + 8, 0xDEADBEEFCAFEBABE).unwrap();
    assert_eq!(mem.read_be64(addr + 8).unwrap(), 0xDEADBEEFCAFEBABE);
    assert_eq!(mem.read_be32(addr + 12).unwrap(), 0xCAFEBABE);
}

#[test]
fn test_bulk_copies() {
    let mem = GuestMemory::new();
    let data: Vec<u8> = (0..64).collect();

    mem.write_bytes(CACHED_BASE + 0x4000, &data).unwrap();
    let mut back = vec![0u8; 64];
    mem.read_bytes(UNCACHED_BASE + 0x4000, &mut back).unwrap();
    assert_eq!(back, data);
}

#[test]
fn test_fetch_requires_executable_region() {
    let mem = GuestMemory::new();
    mem.write_be32(CACHED_BASE, 0x38600005).unwrap();

    assert_eq!(mem.fetch_instruction(CACHED_BASE).unwrap(), 0x38600005);
    assert!(mem.fetch_instruction(0xCC00_0000).is_err());
    assert!(mem.fetch_instruction(LOCKED_CACHE_BASE).is_err());
}

struct Latch {
    last_write: AtomicU32,
}

impl MmioDevice for Latch {
    fn read(&self, offset: u32, _size: u8) -> u32 {
        0xAB00_0000 | offset
    }

    fn write(&self, _offset: u32, _size: u8, value: u32) {
        self.last_write.store(value, Ordering::SeqCst);
    }
}

#[test]
fn test_mmio_dispatch() {
    let mem = GuestMemory::new();
    let latch = Arc::new(Latch {
        last_write: AtomicU32::new(0),
    });
    mem.register_mmio(0xCC00_3000, 0x100, latch.clone());

    assert_eq!(mem.read_be32(0xCC00_3004).unwrap(), 0xAB00_0004);
    assert_eq!(mem.read_be16(0x0C00_3008).unwrap(), 0x0008);

    mem.write_be32(0xCC00_3000, 0x1234_5678).unwrap();
    assert_eq!(latch.last_write.load(Ordering::SeqCst), 0x1234_5678);
    assert!(mem.region_flags(0xCC00_3000).contains(RegionFlags::MMIO));

    // Unclaimed registers read as zero
    assert_eq!(mem.read_be32(0xCC00_5000).unwrap(), 0);
}

#[test]
fn test_snapshot_restore() {
    let mem = GuestMemory::new();
    mem.write_be32(CACHED_BASE + 0x100, 0xFEEDFACE).unwrap();
    mem.write_be32(LOCKED_CACHE_BASE + 0x10, 0x0BADF00D).unwrap();
    let image = mem.snapshot();

    let other = GuestMemory::new();
    other.restore(&image).unwrap();
    assert_eq!(other.read_be32(CACHED_BASE + 0x100).unwrap(), 0xFEEDFACE);
    assert_eq!(other.read_be32(LOCKED_CACHE_BASE + 0x10).unwrap(), 0x0BADF00D);

    assert_eq!(
        other.restore(&image[..16]),
        Err(MemoryError::SnapshotSize {
            expected: image.len(),
            actual: 16
        })
    );
}
