//! System Call Access Probes
//!
//! Decides whether an applet may read, write or execute a memory range
//! before the kernel touches it on the applet's behalf.
//!
//! # Security Principles
//! - Deny by default: no active applet means no access
//! - Probes only report; the dispatcher decides how to react
//! - Ranges must fit in a single area; wrapping ranges are always denied
//!
//! # Admission
//! ```text
//! ┌───────────────────┬──────┬───────┐
//! │ area              │ read │ write │
//! ├───────────────────┼──────┼───────┤
//! │ data1, data2      │ yes  │ yes   │
//! │ framebuffer       │ yes  │ yes   │
//! │ code1, code2      │ yes  │ no    │
//! │ assets (if priv.) │ yes  │ no    │
//! └───────────────────┴──────┴───────┘
//! ```
//! A null address is admitted with any length: it stands for an omitted
//! optional buffer and is never dereferenced.

use log::trace;

use crate::applet::{Access, ActiveApplet, AppletPrivileges};
use crate::mm::address::range_end;
use crate::mm::Region;

/// Fixed message for access violations.
pub const ACCESS_VIOLATION: &str = "Access violation";

/// A snapshot of everything the probes consult.
#[derive(Debug, Clone, Copy)]
pub struct Mediator {
    active: Option<ActiveApplet>,
    assets: Region,
    #[cfg(feature = "framebuffer")]
    framebuffer: Option<Region>,
}

impl Mediator {
    pub const fn new(active: Option<ActiveApplet>, assets: Region) -> Self {
        Self {
            active,
            assets,
            #[cfg(feature = "framebuffer")]
            framebuffer: None,
        }
    }

    /// Add the currently displayed framebuffer.
    #[cfg(feature = "framebuffer")]
    pub const fn with_framebuffer(mut self, framebuffer: Option<Region>) -> Self {
        self.framebuffer = framebuffer;
        self
    }

    /// Check if the active applet may read `[addr, addr + len)`.
    pub fn probe_read(&self, addr: usize, len: usize) -> bool {
        let admitted = self.admit(addr, len, Access::READ);
        if !admitted {
            trace!("[PROBE] read {:#x}+{:#x} denied", addr, len);
        }
        admitted
    }

    /// Check if the active applet may write `[addr, addr + len)`.
    pub fn probe_write(&self, addr: usize, len: usize) -> bool {
        let admitted = self.admit(addr, len, Access::WRITE);
        if !admitted {
            trace!("[PROBE] write {:#x}+{:#x} denied", addr, len);
        }
        admitted
    }

    /// Check if `addr` lies in the active applet's code.
    pub fn probe_execute(&self, addr: usize) -> bool {
        match &self.active {
            Some(applet) => applet.layout.is_code(addr),
            None => false,
        }
    }

    fn admit(&self, addr: usize, len: usize, access: Access) -> bool {
        let Some(applet) = &self.active else {
            return false;
        };

        if addr == 0 {
            return true;
        }

        if range_end(addr, len).is_none() {
            return false;
        }

        if applet.layout.permits(addr, len, access) {
            return true;
        }

        if self.inside_framebuffer(addr, len) {
            return true;
        }

        access == Access::READ
            && applet
                .privileges
                .contains(AppletPrivileges::ASSETS_AREA_ACCESS)
            && self.assets.contains(addr, len)
    }

    #[cfg(feature = "framebuffer")]
    fn inside_framebuffer(&self, addr: usize, len: usize) -> bool {
        matches!(self.framebuffer, Some(fb) if fb.contains(addr, len))
    }

    #[cfg(not(feature = "framebuffer"))]
    fn inside_framebuffer(&self, _addr: usize, _len: usize) -> bool {
        false
    }
}
