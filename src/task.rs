//! Task Primitive Interface
//!
//! The kernel does not schedule anything itself. It drives a single
//! execution context supplied by the platform through the [`Task`] trait:
//! reset it onto a stack, push the startup call, then yield to it until it
//! hands control back.
//!
//! # Fatal Exits
//! Every fatal condition flows through [`FatalExit`]. Its [`FatalScope`]
//! decides whether only the applet context dies or the whole device halts.

use core::fmt;

use crate::mm::Region;
use crate::syscall::SyscallHandler;

/// Who is taken down by a fatal exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalScope {
    /// Terminate the faulting applet task; the kernel keeps running.
    Task,
    /// Fault in kernel-privileged context; the device must halt.
    System,
}

/// A fatal exit record: message plus the source location that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatalExit {
    pub scope: FatalScope,
    pub message: &'static str,
    pub file: &'static str,
    pub line: u32,
}

impl FatalExit {
    /// Fatal exit confined to the applet task.
    pub const fn task(message: &'static str, file: &'static str, line: u32) -> Self {
        Self {
            scope: FatalScope::Task,
            message,
            file,
            line,
        }
    }

    /// Fatal exit that halts the system.
    pub const fn system(message: &'static str, file: &'static str, line: u32) -> Self {
        Self {
            scope: FatalScope::System,
            message,
            file,
            line,
        }
    }
}

impl fmt::Display for FatalExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.message, self.file, self.line)
    }
}

/// Why control came back from a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskExit {
    /// The task handed control back but is still alive and can be resumed.
    Yielded,
    /// The task returned from its entry point.
    Exited(i32),
    /// The task was terminated by a fatal exit.
    Fatal(FatalExit),
}

impl TaskExit {
    /// Check if the task is finished for good.
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Yielded)
    }
}

/// The first call made in a freshly reset task.
#[derive(Debug, Clone, Copy)]
pub struct StartupCall<'a> {
    /// Entry point address.
    pub entry: usize,
    /// Startup command selected by the kernel.
    pub cmd: u32,
    /// Argument blob, copied onto the task stack by the primitive.
    pub args: &'a [u8],
    /// Random seed handed to the applet.
    pub seed: u32,
}

/// Error type for task primitive operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    /// The stack area cannot hold the task frame.
    StackTooSmall,
    /// The task is not in a state that accepts the request.
    InvalidState,
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackTooSmall => write!(f, "task stack too small"),
            Self::InvalidState => write!(f, "task in invalid state"),
        }
    }
}

/// A single unprivileged execution context provided by the platform.
pub trait Task {
    /// Re-initialize the task on the given stack. The task is not alive
    /// until a startup call is pushed.
    fn reset(&mut self, stack: Region) -> Result<(), TaskError>;

    /// Arrange for the task to start at `call.entry` the next time it runs.
    fn push_call(&mut self, call: &StartupCall<'_>) -> Result<(), TaskError>;

    /// Switch to the task and block until it yields, exits or faults.
    ///
    /// Every syscall the task issues in the meantime is routed to `syscalls`.
    fn yield_to(&mut self, syscalls: &dyn SyscallHandler) -> TaskExit;

    /// Check if the task can still run.
    fn is_alive(&self) -> bool;

    /// Terminate the task. Must be safe on a task that already died.
    fn kill(&mut self);
}
