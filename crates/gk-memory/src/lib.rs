//! Guest memory for the gekko PowerPC core
//!
//! The CPU only sees the [`Memory`] trait: synchronous, big-endian,
//! byte-addressed accesses that may have side effects. [`GuestMemory`]
//! is the GameCube-shaped implementation used by the front-end and tests.

pub mod constants;
pub mod guest;
pub mod mmio;
pub mod region;

pub use gk_core::error::MemoryError;
pub use guest::GuestMemory;
pub use mmio::MmioDevice;
pub use region::{Region, RegionFlags};

/// Guest memory as seen by the CPU
pub trait Memory: Send + Sync {
    fn read_u8(&self, addr: u32) -> Result<u8, MemoryError>;
    fn read_be16(&self, addr: u32) -> Result<u16, MemoryError>;
    fn read_be32(&self, addr: u32) -> Result<u32, MemoryError>;
    fn read_be64(&self, addr: u32) -> Result<u64, MemoryError>;

    fn write_u8(&self, addr: u32, value: u8) -> Result<(), MemoryError>;
    fn write_be16(&self, addr: u32, value: u16) -> Result<(), MemoryError>;
    fn write_be32(&self, addr: u32, value: u32) -> Result<(), MemoryError>;
    fn write_be64(&self, addr: u32, value: u64) -> Result<(), MemoryError>;

    /// Copy guest bytes out, starting at `addr`
    fn read_bytes(&self, addr: u32, buf: &mut [u8]) -> Result<(), MemoryError>;

    /// Copy bytes into guest memory, starting at `addr`
    fn write_bytes(&self, addr: u32, data: &[u8]) -> Result<(), MemoryError>;

    /// Whether a `len`-byte store at `addr` would succeed, without storing
    fn is_writable(&self, addr: u32, len: u32) -> bool;

    /// Read an instruction word. Fails for regions that cannot hold code.
    fn fetch_instruction(&self, addr: u32) -> Result<u32, MemoryError>;

    /// Copy of every backed region, for save states
    fn snapshot(&self) -> Vec<u8>;

    /// Restore an image produced by [`Memory::snapshot`]
    fn restore(&self, image: &[u8]) -> Result<(), MemoryError>;
}
