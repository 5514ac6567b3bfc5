//! Shared facilities for the gekko workspace
//!
//! Every other crate depends on this one for the error taxonomy,
//! the persisted configuration and the logging setup.

pub mod config;
pub mod error;
pub mod logging;

pub use config::Config;
pub use error::{ConfigError, CpuError, EmulatorError, MemoryError, Result};
