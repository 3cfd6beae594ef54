//! Applet Header and Privileges
//!
//! The header sits at the beginning of every applet binary. The kernel never
//! trusts it: every address it carries is checked against the applet's own
//! layout before the applet is allowed to run.

use bitflags::bitflags;

use super::layout::{Access, AppletLayout};
use crate::config::AES_BLOCK_SIZE;
use crate::mm::Region;

bitflags! {
    /// Privileges granted to an applet on top of its own layout.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AppletPrivileges: u32 {
        /// Read access to the shared assets area.
        const ASSETS_AREA_ACCESS = 1 << 0;
    }
}

/// Slots used by the kernel to delegate AES operations with the
/// unprivileged key to the applet. Zero means "not provided".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CryptoDelegate {
    /// One-block input buffer in applet data memory.
    pub saes_input: usize,
    /// One-block output buffer in applet data memory.
    pub saes_output: usize,
    /// Unprivileged callback performing the operation.
    pub saes_callback: usize,
}

/// Header found at the beginning of the applet binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppletHeader {
    /// Stack area.
    pub stack: Region,
    /// Entry point address.
    pub startup: usize,
    /// Delegated crypto I/O slots.
    pub delegate: CryptoDelegate,
}

/// Which part of a header failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderFault {
    /// Entry point outside the code areas.
    Entry,
    /// Stack empty or outside the data areas.
    Stack,
    /// Delegated I/O buffer outside the data areas.
    DelegateBuffer,
    /// Delegated callback outside the code areas.
    DelegateCallback,
}

impl core::fmt::Display for HeaderFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Entry => write!(f, "entry point outside code"),
            Self::Stack => write!(f, "stack outside data"),
            Self::DelegateBuffer => write!(f, "delegate buffer outside data"),
            Self::DelegateCallback => write!(f, "delegate callback outside code"),
        }
    }
}

impl AppletHeader {
    /// Check every address in the header against `layout`.
    pub fn validate(&self, layout: &AppletLayout) -> Result<(), HeaderFault> {
        if !layout.is_code(self.startup) {
            return Err(HeaderFault::Entry);
        }

        if self.stack.is_empty()
            || !layout.permits(self.stack.start(), self.stack.size(), Access::READ_WRITE)
        {
            return Err(HeaderFault::Stack);
        }

        for buf in [self.delegate.saes_input, self.delegate.saes_output] {
            if buf != 0 && !layout.permits(buf, AES_BLOCK_SIZE, Access::READ_WRITE) {
                return Err(HeaderFault::DelegateBuffer);
            }
        }

        let callback = self.delegate.saes_callback;
        if callback != 0 && !layout.is_code(callback) {
            return Err(HeaderFault::DelegateCallback);
        }

        Ok(())
    }
}
