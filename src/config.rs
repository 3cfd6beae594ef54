//! Compiled-in Configuration
//!
//! Per-platform constants consumed by the kernel. Nothing here is parsed at
//! runtime; boards override the defaults by building their own
//! [`KernelConfig`].

use crate::mm::Region;

/// Maximum number of blocks in a memory region set.
pub const MEMREGION_MAX_BLOCKS: usize = 8;

/// Maximum size of the startup argument blob passed to an applet.
pub const APPLET_MAX_ARG_SIZE: usize = 256;

/// AES block size in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

/// Shared assets storage (flash, read-only for applets).
pub const ASSETS_START: usize = 0x0C0C_0000;
/// Maximum size of the assets area.
pub const ASSETS_MAXSIZE: usize = 0x0001_0000;

/// Static kernel configuration.
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    /// Assets area readable by applets holding the assets privilege.
    pub assets: Region,
}

impl KernelConfig {
    /// Default configuration for the reference board.
    pub const DEFAULT: Self = Self {
        assets: Region::fixed(ASSETS_START, ASSETS_START + ASSETS_MAXSIZE),
    };
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
