//! Warden - Applet Isolation Core
//!
//! Privilege separation for secure-element firmware running semi-trusted
//! applets next to a trusted kernel.
//!
//! # Components
//! - Region model: granule-aligned address sets with copy-on-write updates
//! - Applet layout and lifecycle: init, reset, run, stop
//! - Syscall mediator: read/write/execute probes on applet buffers
//! - Key gate: which hardware AES key each execution context may use
//!
//! # Security Features
//! - Deny by default: no active applet means no access
//! - A single fatal-exit path with explicit task or system scope
//! - Startup arguments and AES bounce buffers are zeroized
//!
//! # Integration
//! The platform supplies the task primitive ([`task::Task`]), the AES engine
//! ([`security::AesEngine`]) and board services ([`platform::Platform`]).
//! Log output goes through the `log` facade; install a logger to see it.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod applet;
pub mod config;
pub mod kernel;
pub mod mm;
pub mod platform;
pub mod security;
pub mod syscall;
pub mod task;

#[cfg(test)]
mod testing;

pub use applet::{Applet, AppletId, AppletState, LifecycleError};
pub use config::KernelConfig;
pub use kernel::Kernel;
pub use mm::{Region, RegionSet};
pub use task::{FatalExit, FatalScope, TaskExit};

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
