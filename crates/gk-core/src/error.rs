//! Error types
//!
//! Guest-visible faults (DSI, ISI, program checks and so on) are not
//! errors: the interpreter records them in the exception bitmask. The
//! types here cover the host-facing paths only.

use thiserror::Error;

/// Result alias used across the workspace
pub type Result<T> = std::result::Result<T, EmulatorError>;

/// Top-level error
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("CPU error: {0}")]
    Cpu(#[from] CpuError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Guest memory access errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Unmapped address 0x{addr:08x}")]
    Unmapped { addr: u32 },

    #[error("Access of {len} bytes at 0x{addr:08x} crosses the end of its region")]
    OutOfBounds { addr: u32, len: usize },

    #[error("Write to read-only address 0x{addr:08x}")]
    ReadOnly { addr: u32 },

    #[error("Memory image size mismatch: expected {expected} bytes, got {actual}")]
    SnapshotSize { expected: usize, actual: usize },
}

/// CPU control and save-state errors
#[derive(Error, Debug)]
pub enum CpuError {
    #[error("CPU is powered down")]
    PoweredDown,

    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),

    #[error("Failed to save state: {0}")]
    SaveState(String),

    #[error("Failed to load state: {0}")]
    LoadState(String),

    #[error("Incompatible save state: expected version {expected}, found {found}")]
    IncompatibleState { expected: u32, found: u32 },
}

/// Configuration file errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("No configuration directory available on this platform")]
    NoConfigDir,
}
