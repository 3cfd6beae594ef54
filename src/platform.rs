//! Platform Services
//!
//! The few board services the kernel core needs and does not implement.

use crate::task::FatalExit;

/// Board support consumed by the kernel.
pub trait Platform {
    /// A fresh random value for applet startup.
    fn random_u32(&self) -> u32;

    /// Halt the device after a fault in kernel-privileged context.
    ///
    /// Shows or records `fatal` if the board can, then never returns.
    fn halt(&self, fatal: &FatalExit) -> !;
}
