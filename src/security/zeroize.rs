//! Secure Memory Zeroization
//!
//! Wipes buffers that carried applet arguments or cipher blocks so nothing
//! leaks between applet runs or between key gate calls.
//!
//! # Design
//! - `Zeroize` trait for buffers that can be securely cleared
//! - `SecureWrapper<T>` RAII type that zeros on drop
//! - Volatile writes prevent the compiler from eliding the wipe

use core::ptr;
use core::sync::atomic::{compiler_fence, Ordering};

use crate::config::{AES_BLOCK_SIZE, APPLET_MAX_ARG_SIZE};

/// Trait for types that can be securely zeroed.
pub trait Zeroize {
    /// Overwrite this value with zeros. Never optimized away.
    fn zeroize(&mut self);
}

impl Zeroize for [u8] {
    fn zeroize(&mut self) {
        for byte in self.iter_mut() {
            // SAFETY: `byte` is a valid, exclusive reference
            unsafe { ptr::write_volatile(byte, 0) };
        }
        compiler_fence(Ordering::SeqCst);
    }
}

impl<const N: usize> Zeroize for [u8; N] {
    fn zeroize(&mut self) {
        self.as_mut_slice().zeroize();
    }
}

/// A wrapper that zeroizes its contents on drop.
#[derive(Debug)]
pub struct SecureWrapper<T: Zeroize> {
    inner: T,
}

impl<T: Zeroize> SecureWrapper<T> {
    #[inline]
    pub const fn new(value: T) -> Self {
        Self { inner: value }
    }

    #[inline]
    pub fn inner(&self) -> &T {
        &self.inner
    }

    #[inline]
    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Wipe the contents now, keeping the wrapper usable.
    #[inline]
    pub fn wipe(&mut self) {
        self.inner.zeroize();
    }
}

impl<T: Zeroize> Drop for SecureWrapper<T> {
    fn drop(&mut self) {
        self.inner.zeroize();
    }
}

impl<T: Zeroize + Default> Default for SecureWrapper<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// One AES block in flight through the kernel.
pub type SecureBlock = SecureWrapper<[u8; AES_BLOCK_SIZE]>;

/// Staging buffer for an applet's startup arguments.
pub type SecureArgs = SecureWrapper<[u8; APPLET_MAX_ARG_SIZE]>;
