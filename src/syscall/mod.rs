//! System Call Interface
//!
//! The boundary between the active applet and the kernel.
//!
//! # Security Model
//! - Whitelist approach: only explicitly implemented syscalls are served
//! - Buffers are probed against the active applet's layout before use
//! - The caller's identity comes from the kernel's active slot, never from
//!   syscall arguments
//! - Denied probes escalate to a task-scoped fatal exit
//!
//! # Current Syscalls
//! - 1: aes_ecb_encrypt_hw(input, size, output, key)
//! - 2: aes_ecb_decrypt_hw(input, size, output, key)

pub mod handler;
pub mod probe;

pub use handler::{numbers, SyscallArgs, SyscallError};
pub use probe::{Mediator, ACCESS_VIOLATION};

use crate::task::FatalExit;

/// What a running task sees of the kernel.
///
/// The platform's exception entry routes every supervisor call from the
/// applet task to this trait.
pub trait SyscallHandler {
    /// Check if the active applet may read `[addr, addr + len)`.
    fn probe_read(&self, addr: usize, len: usize) -> bool;

    /// Check if the active applet may write `[addr, addr + len)`.
    fn probe_write(&self, addr: usize, len: usize) -> bool;

    /// Check if `addr` lies in the active applet's code.
    fn probe_execute(&self, addr: usize) -> bool;

    /// Escalate a denied access into a fatal exit of the active applet.
    fn handle_access_violation(&self, file: &'static str, line: u32) -> FatalExit;

    /// Serve syscall `number`.
    ///
    /// `Err` carries the fatal exit the task must terminate with.
    fn dispatch(&self, number: usize, args: &SyscallArgs) -> Result<i64, FatalExit>;
}

/// Terminate the active applet with an access violation at the call site.
#[macro_export]
macro_rules! access_violation {
    ($handler:expr) => {
        $handler.handle_access_violation(file!(), line!())
    };
}
