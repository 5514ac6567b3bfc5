//! Memory-mapped hardware registers

/// A device claiming part of the hardware register window.
///
/// Offsets are relative to the base the device was registered at.
/// Accesses are at most 32 bits wide; 64-bit accesses arrive as two
/// consecutive 32-bit ones.
pub trait MmioDevice: Send + Sync {
    fn read(&self, offset: u32, size: u8) -> u32;
    fn write(&self, offset: u32, size: u8, value: u32);
}

pub(crate) struct MmioMapping {
    pub base: u32,
    pub size: u32,
    pub device: std::sync::Arc<dyn MmioDevice>,
}

impl MmioMapping {
    pub fn contains(&self, phys: u32) -> bool {
        phys >= self.base && phys - self.base < self.size
    }
}
