//! GameCube-shaped guest memory

use std::sync::Arc;

use parking_lot::RwLock;

use crate::constants::*;
use crate::mmio::{MmioDevice, MmioMapping};
use crate::region::{Region, RegionFlags};
use crate::{Memory, MemoryError};

/// MEM1, the locked L1 cache and the hardware register window
pub struct GuestMemory {
    ram: RwLock<Box<[u8]>>,
    locked_cache: RwLock<Box<[u8]>>,
    mmio: RwLock<Vec<MmioMapping>>,
}

impl GuestMemory {
    /// Create zero-filled memory
    pub fn new() -> Self {
        tracing::debug!(
            "Allocating {} MB of MEM1 and {} KB of locked cache",
            MEM1_SIZE >> 20,
            LOCKED_CACHE_SIZE >> 10
        );
        Self {
            ram: RwLock::new(vec![0u8; MEM1_SIZE as usize].into_boxed_slice()),
            locked_cache: RwLock::new(vec![0u8; LOCKED_CACHE_SIZE as usize].into_boxed_slice()),
            mmio: RwLock::new(Vec::new()),
        }
    }

    /// Claim `[base, base + size)` of the hardware register window.
    ///
    /// `base` may be given through either mirror; it is stored physically.
    pub fn register_mmio(&self, base: u32, size: u32, device: Arc<dyn MmioDevice>) {
        let base = base & MIRROR_MASK;
        debug_assert!(base >= MMIO_BASE && base + size <= MMIO_BASE + MMIO_SIZE);
        tracing::debug!("Registered MMIO device at 0x{:08x} (+0x{:x})", base, size);
        self.mmio.write().push(MmioMapping { base, size, device });
    }

    /// Permissions of the region containing `addr`
    pub fn region_flags(&self, addr: u32) -> RegionFlags {
        Region::resolve(addr).map(Region::flags).unwrap_or_default()
    }

    fn resolve(addr: u32) -> Result<Region, MemoryError> {
        Region::resolve(addr).ok_or(MemoryError::Unmapped { addr })
    }

    fn copy_out<const N: usize>(mem: &[u8], offset: usize, addr: u32) -> Result<[u8; N], MemoryError> {
        let bytes = mem
            .get(offset..offset + N)
            .ok_or(MemoryError::OutOfBounds { addr, len: N })?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn copy_in(mem: &mut [u8], offset: usize, addr: u32, data: &[u8]) -> Result<(), MemoryError> {
        let target = mem
            .get_mut(offset..offset + data.len())
            .ok_or(MemoryError::OutOfBounds { addr, len: data.len() })?;
        target.copy_from_slice(data);
        Ok(())
    }

    fn mmio_read(&self, phys: u32, size: u8) -> u32 {
        let mappings = self.mmio.read();
        match mappings.iter().find(|m| m.contains(phys)) {
            Some(m) => m.device.read(phys - m.base, size),
            None => {
                tracing::warn!("Unhandled MMIO read{} at 0x{:08x}", size * 8, phys);
                0
            }
        }
    }

    fn mmio_write(&self, phys: u32, size: u8, value: u32) {
        let mappings = self.mmio.read();
        match mappings.iter().find(|m| m.contains(phys)) {
            Some(m) => m.device.write(phys - m.base, size, value),
            None => {
                tracing::warn!(
                    "Unhandled MMIO write{} at 0x{:08x} = 0x{:08x}",
                    size * 8,
                    phys,
                    value
                );
            }
        }
    }

    fn read_n<const N: usize>(&self, addr: u32) -> Result<[u8; N], MemoryError> {
        match Self::resolve(addr)? {
            Region::Ram(offset) => Self::copy_out(&self.ram.read(), offset, addr),
            Region::LockedCache(offset) => Self::copy_out(&self.locked_cache.read(), offset, addr),
            Region::Mmio(phys) => {
                let mut out = [0u8; N];
                if N == 8 {
                    out[..4].copy_from_slice(&self.mmio_read(phys, 4).to_be_bytes());
                    out[4..].copy_from_slice(&self.mmio_read(phys + 4, 4).to_be_bytes());
                } else {
                    let value = self.mmio_read(phys, N as u8).to_be_bytes();
                    out.copy_from_slice(&value[4 - N..]);
                }
                Ok(out)
            }
        }
    }

    fn write_n<const N: usize>(&self, addr: u32, bytes: [u8; N]) -> Result<(), MemoryError> {
        match Self::resolve(addr)? {
            Region::Ram(offset) => Self::copy_in(&mut self.ram.write(), offset, addr, &bytes),
            Region::LockedCache(offset) => {
                Self::copy_in(&mut self.locked_cache.write(), offset, addr, &bytes)
            }
            Region::Mmio(phys) => {
                if N == 8 {
                    let (mut hi, mut lo) = ([0u8; 4], [0u8; 4]);
                    hi.copy_from_slice(&bytes[..4]);
                    lo.copy_from_slice(&bytes[4..]);
                    self.mmio_write(phys, 4, u32::from_be_bytes(hi));
                    self.mmio_write(phys + 4, 4, u32::from_be_bytes(lo));
                } else {
                    let mut word = [0u8; 4];
                    word[4 - N..].copy_from_slice(&bytes);
                    self.mmio_write(phys, N as u8, u32::from_be_bytes(word));
                }
                Ok(())
            }
        }
    }
}

impl Default for GuestMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory for GuestMemory {
    fn read_u8(&self, addr: u32) -> Result<u8, MemoryError> {
        Ok(self.read_n::<1>(addr)?[0])
    }

    fn read_be16(&self, addr: u32) -> Result<u16, MemoryError> {
        Ok(u16::from_be_bytes(self.read_n(addr)?))
    }

    fn read_be32(&self, addr: u32) -> Result<u32, MemoryError> {
        Ok(u32::from_be_bytes(self.read_n(addr)?))
    }

    fn read_be64(&self, addr: u32) -> Result<u64, MemoryError> {
        Ok(u64::from_be_bytes(self.read_n(addr)?))
    }

    fn write_u8(&self, addr: u32, value: u8) -> Result<(), MemoryError> {
        self.write_n(addr, [value])
    }

    fn write_be16(&self, addr: u32, value: u16) -> Result<(), MemoryError> {
        self.write_n(addr, value.to_be_bytes())
    }

    fn write_be32(&self, addr: u32, value: u32) -> Result<(), MemoryError> {
        self.write_n(addr, value.to_be_bytes())
    }

    fn write_be64(&self, addr: u32, value: u64) -> Result<(), MemoryError> {
        self.write_n(addr, value.to_be_bytes())
    }

    fn read_bytes(&self, addr: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
        match Self::resolve(addr)? {
            Region::Ram(offset) => {
                let ram = self.ram.read();
                let src = ram
                    .get(offset..offset + buf.len())
                    .ok_or(MemoryError::OutOfBounds { addr, len: buf.len() })?;
                buf.copy_from_slice(src);
                Ok(())
            }
            Region::LockedCache(offset) => {
                let cache = self.locked_cache.read();
                let src = cache
                    .get(offset..offset + buf.len())
                    .ok_or(MemoryError::OutOfBounds { addr, len: buf.len() })?;
                buf.copy_from_slice(src);
                Ok(())
            }
            Region::Mmio(_) => {
                for (i, byte) in buf.iter_mut().enumerate() {
                    *byte = self.read_u8(addr.wrapping_add(i as u32))?;
                }
                Ok(())
            }
        }
    }

    fn write_bytes(&self, addr: u32, data: &[u8]) -> Result<(), MemoryError> {
        match Self::resolve(addr)? {
            Region::Ram(offset) => Self::copy_in(&mut self.ram.write(), offset, addr, data),
            Region::LockedCache(offset) => {
                Self::copy_in(&mut self.locked_cache.write(), offset, addr, data)
            }
            Region::Mmio(_) => {
                for (i, byte) in data.iter().enumerate() {
                    self.write_u8(addr.wrapping_add(i as u32), *byte)?;
                }
                Ok(())
            }
        }
    }

    fn is_writable(&self, addr: u32, len: u32) -> bool {
        match Region::resolve(addr) {
            Some(Region::Ram(offset)) => offset as u64 + len as u64 <= MEM1_SIZE as u64,
            Some(Region::LockedCache(offset)) => offset as u64 + len as u64 <= LOCKED_CACHE_SIZE as u64,
            Some(Region::Mmio(_)) => true,
            None => false,
        }
    }

    fn fetch_instruction(&self, addr: u32) -> Result<u32, MemoryError> {
        let region = Self::resolve(addr)?;
        if !region.flags().contains(RegionFlags::EXECUTE) {
            return Err(MemoryError::Unmapped { addr });
        }
        self.read_be32(addr)
    }

    fn snapshot(&self) -> Vec<u8> {
        let ram = self.ram.read();
        let cache = self.locked_cache.read();
        let mut image = Vec::with_capacity(ram.len() + cache.len());
        image.extend_from_slice(&ram);
        image.extend_from_slice(&cache);
        image
    }

    fn restore(&self, image: &[u8]) -> Result<(), MemoryError> {
        let mut ram = self.ram.write();
        let mut cache = self.locked_cache.write();
        let expected = ram.len() + cache.len();
        if image.len() != expected {
            return Err(MemoryError::SnapshotSize {
                expected,
                actual: image.len(),
            });
        }
        let (ram_image, cache_image) = image.split_at(ram.len());
        ram.copy_from_slice(ram_image);
        cache.copy_from_slice(cache_image);
        Ok(())
    }
}
