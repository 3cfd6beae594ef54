//! System Call Handler
//!
//! Dispatches system calls issued by the active applet.
//!
//! # Security Considerations
//! - Only whitelisted syscall numbers are served; others return ENOSYS
//! - Every applet buffer is probed before the kernel reads or writes it
//! - A denied probe is an access violation and terminates the applet
//! - Applet memory is only touched through one-block bounce buffers, so
//!   overlapping input/output ranges are harmless

use core::ptr;

use log::{debug, warn};

use super::SyscallHandler;
use crate::access_violation;
use crate::config::AES_BLOCK_SIZE;
use crate::kernel::Kernel;
use crate::platform::Platform;
use crate::security::key_gate::{AesEngine, Direction, ExecutionContext, KeyGateError, KeySelector};
use crate::security::zeroize::SecureBlock;
use crate::task::FatalExit;

/// System call numbers
pub mod numbers {
    /// `aes_ecb_encrypt_hw(input, size, output, key)`
    pub const SYS_AES_ECB_ENCRYPT: usize = 1;
    /// `aes_ecb_decrypt_hw(input, size, output, key)`
    pub const SYS_AES_ECB_DECRYPT: usize = 2;
}

/// Raw syscall arguments (r0-r5).
pub type SyscallArgs = [usize; 6];

/// System call error codes
#[repr(i64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    /// Operation not permitted
    Eperm = -1,
    /// I/O error
    Eio = -5,
    /// Invalid argument
    Einval = -22,
    /// Invalid system call number
    Enosys = -38,
}

impl From<KeyGateError> for SyscallError {
    fn from(e: KeyGateError) -> Self {
        match e {
            KeyGateError::Denied => Self::Eperm,
            KeyGateError::UnknownKey
            | KeyGateError::InvalidLength
            | KeyGateError::BufferTooSmall => Self::Einval,
            KeyGateError::NotInitialized | KeyGateError::Engine(_) => Self::Eio,
        }
    }
}

/// Dispatch a system call from the active applet.
///
/// # Returns
/// * `Ok(value)` - result for the applet (negative values are errors)
/// * `Err(fatal)` - the applet must be terminated
pub(crate) fn dispatch<E: AesEngine, P: Platform>(
    kernel: &Kernel<E, P>,
    number: usize,
    args: &SyscallArgs,
) -> Result<i64, FatalExit> {
    match number {
        numbers::SYS_AES_ECB_ENCRYPT | numbers::SYS_AES_ECB_DECRYPT => {
            let direction = if number == numbers::SYS_AES_ECB_ENCRYPT {
                Direction::Encrypt
            } else {
                Direction::Decrypt
            };
            sys_aes_ecb(kernel, direction, args[0], args[1], args[2], args[3])
        }
        _ => {
            warn!("[SYSCALL] Unknown syscall: {}", number);
            Ok(SyscallError::Enosys as i64)
        }
    }
}

/// AES-ECB with a hardware key on applet buffers.
///
/// # Security
/// - Input is probed for read and output for write before anything happens
/// - The key gate sees the applet's own identity, never a caller-supplied one
/// - A denied key leaves the output untouched
/// - An engine fault mid-buffer leaves the blocks before it written
fn sys_aes_ecb<E: AesEngine, P: Platform>(
    kernel: &Kernel<E, P>,
    direction: Direction,
    input: usize,
    size: usize,
    output: usize,
    key: usize,
) -> Result<i64, FatalExit> {
    let Some(active) = kernel.active() else {
        return Err(access_violation!(kernel));
    };

    if !kernel.probe_read(input, size) || !kernel.probe_write(output, size) {
        return Err(access_violation!(kernel));
    }

    // null buffers are admitted by the probes but mean nothing here
    if input == 0 || output == 0 || size % AES_BLOCK_SIZE != 0 {
        return Ok(SyscallError::Einval as i64);
    }

    let key = match u32::try_from(key).ok().map(KeySelector::try_from) {
        Some(Ok(key)) => key,
        _ => return Ok(SyscallError::Einval as i64),
    };

    let context = ExecutionContext::Applet(active.id);
    let mut gate = kernel.key_gate();
    if let Err(e) = gate.authorize(context, key) {
        return Ok(SyscallError::from(e) as i64);
    }

    let mut src = SecureBlock::default();
    let mut dst = SecureBlock::default();
    for offset in (0..size).step_by(AES_BLOCK_SIZE) {
        // SAFETY: both ranges were admitted by the probes above, so every
        // block lies in memory owned by the active applet
        unsafe {
            ptr::copy_nonoverlapping(
                (input + offset) as *const u8,
                src.inner_mut().as_mut_ptr(),
                AES_BLOCK_SIZE,
            );
        }
        if let Err(e) = gate.process(context, key, direction, src.inner(), dst.inner_mut()) {
            debug!("[SYSCALL] aes_ecb failed: {}", e);
            return Ok(SyscallError::from(e) as i64);
        }
        // SAFETY: see above
        unsafe {
            ptr::copy_nonoverlapping(
                dst.inner().as_ptr(),
                (output + offset) as *mut u8,
                AES_BLOCK_SIZE,
            );
        }
    }

    Ok(0)
}

impl<E: AesEngine, P: Platform> SyscallHandler for Kernel<E, P> {
    fn probe_read(&self, addr: usize, len: usize) -> bool {
        Kernel::probe_read(self, addr, len)
    }

    fn probe_write(&self, addr: usize, len: usize) -> bool {
        Kernel::probe_write(self, addr, len)
    }

    fn probe_execute(&self, addr: usize) -> bool {
        Kernel::probe_execute(self, addr)
    }

    fn handle_access_violation(&self, file: &'static str, line: u32) -> FatalExit {
        Kernel::handle_access_violation(self, file, line)
    }

    fn dispatch(&self, number: usize, args: &SyscallArgs) -> Result<i64, FatalExit> {
        dispatch(self, number, args)
    }
}
