//! Applets
//!
//! An applet is a semi-trusted, memory-isolated unit of code. Each applet
//! owns its header, layout, privileges and task. The kernel drives it
//! through its lifecycle:
//!
//! ```text
//! Uninitialized ──init──▶ Initialized ──reset──▶ Ready ──run──▶ Running
//!       ▲                                          ▲               │
//!       └──────────── init ◀── Stopped ◀── stop ───┼───────────────┘
//!                                 └───── reset ────┘
//! ```
//!
//! Lifecycle transitions that touch shared kernel state (`init`, `run`,
//! `stop`) live on [`crate::Kernel`]; this module holds the per-applet half.

pub mod header;
pub mod layout;

use core::fmt;

pub use header::{AppletHeader, AppletPrivileges, CryptoDelegate, HeaderFault};
pub use layout::{Access, AppletLayout, LayoutError};

use crate::config::APPLET_MAX_ARG_SIZE;
use crate::security::zeroize::SecureArgs;
use crate::syscall::SyscallHandler;
use crate::task::{FatalExit, StartupCall, Task, TaskError, TaskExit};

/// Kernel-assigned applet identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct AppletId(u32);

impl AppletId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for AppletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AppletId({})", self.0)
    }
}

impl fmt::Display for AppletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "applet#{}", self.0)
    }
}

/// Lifecycle state of an applet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppletState {
    Uninitialized,
    Initialized,
    Ready,
    Running,
    Stopped,
}

/// Error type for lifecycle operations. All of them are recoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// The operation is not allowed in the applet's current state.
    InvalidState(AppletState),
    /// Startup argument larger than `APPLET_MAX_ARG_SIZE`.
    ArgumentTooLarge(usize),
    /// Header does not fit the applet's own layout.
    MalformedHeader(HeaderFault),
    /// Another applet is already active.
    AnotherAppletActive(AppletId),
    /// The task primitive refused the request.
    Task(TaskError),
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState(s) => write!(f, "not allowed in state {:?}", s),
            Self::ArgumentTooLarge(n) => {
                write!(f, "argument of {} bytes exceeds {}", n, APPLET_MAX_ARG_SIZE)
            }
            Self::MalformedHeader(h) => write!(f, "malformed header: {}", h),
            Self::AnotherAppletActive(id) => write!(f, "{} is already active", id),
            Self::Task(e) => write!(f, "task error: {}", e),
        }
    }
}

impl From<TaskError> for LifecycleError {
    fn from(e: TaskError) -> Self {
        Self::Task(e)
    }
}

impl From<HeaderFault> for LifecycleError {
    fn from(h: HeaderFault) -> Self {
        Self::MalformedHeader(h)
    }
}

/// What the syscall probes see of the active applet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveApplet {
    pub id: AppletId,
    pub layout: AppletLayout,
    pub privileges: AppletPrivileges,
}

/// An applet bound to one task.
pub struct Applet<T: Task> {
    id: Option<AppletId>,
    state: AppletState,
    header: AppletHeader,
    layout: AppletLayout,
    privileges: AppletPrivileges,
    task: T,
    cmd: u32,
    args: SecureArgs,
    args_len: usize,
    /// A startup call is staged and has not been pushed to the task yet.
    pending_start: bool,
    last_exit: Option<TaskExit>,
}

impl<T: Task> Applet<T> {
    /// Create an uninitialized applet around `task`.
    pub const fn new(task: T) -> Self {
        Self {
            id: None,
            state: AppletState::Uninitialized,
            header: AppletHeader {
                stack: crate::mm::Region::EMPTY,
                startup: 0,
                delegate: CryptoDelegate {
                    saes_input: 0,
                    saes_output: 0,
                    saes_callback: 0,
                },
            },
            layout: AppletLayout::EMPTY,
            privileges: AppletPrivileges::empty(),
            task,
            cmd: 0,
            args: SecureArgs::new([0; APPLET_MAX_ARG_SIZE]),
            args_len: 0,
            pending_start: false,
            last_exit: None,
        }
    }

    #[inline]
    pub fn id(&self) -> Option<AppletId> {
        self.id
    }

    #[inline]
    pub fn state(&self) -> AppletState {
        self.state
    }

    #[inline]
    pub fn header(&self) -> &AppletHeader {
        &self.header
    }

    #[inline]
    pub fn layout(&self) -> &AppletLayout {
        &self.layout
    }

    #[inline]
    pub fn privileges(&self) -> AppletPrivileges {
        self.privileges
    }

    #[inline]
    pub fn task(&self) -> &T {
        &self.task
    }

    /// The staged startup argument blob.
    #[inline]
    pub fn args(&self) -> &[u8] {
        &self.args.inner()[..self.args_len]
    }

    /// How the task last handed control back, if it ran since reset.
    #[inline]
    pub fn last_exit(&self) -> Option<TaskExit> {
        self.last_exit
    }

    /// Non-blocking liveness check of the underlying task.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.task.is_alive()
    }

    /// Bind static configuration. Does not touch the task or any hardware.
    pub(crate) fn bind(
        &mut self,
        id: AppletId,
        header: AppletHeader,
        layout: AppletLayout,
        privileges: AppletPrivileges,
    ) -> Result<(), LifecycleError> {
        match self.state {
            AppletState::Uninitialized | AppletState::Stopped => {}
            state => return Err(LifecycleError::InvalidState(state)),
        }

        self.id = Some(id);
        self.header = header;
        self.layout = layout;
        self.privileges = privileges;
        self.clear_args();
        self.pending_start = false;
        self.last_exit = None;
        self.state = AppletState::Initialized;
        Ok(())
    }

    /// Validate the header, reset the task and stage the startup call.
    pub(crate) fn reset(&mut self, cmd: u32, arg: &[u8]) -> Result<(), LifecycleError> {
        match self.state {
            AppletState::Initialized | AppletState::Ready | AppletState::Stopped => {}
            state => return Err(LifecycleError::InvalidState(state)),
        }

        if arg.len() > APPLET_MAX_ARG_SIZE {
            return Err(LifecycleError::ArgumentTooLarge(arg.len()));
        }

        self.header.validate(&self.layout)?;
        self.task.reset(self.header.stack)?;

        self.clear_args();
        self.args.inner_mut()[..arg.len()].copy_from_slice(arg);
        self.args_len = arg.len();
        self.cmd = cmd;
        self.pending_start = true;
        self.last_exit = None;
        self.state = AppletState::Ready;
        Ok(())
    }

    /// Snapshot for the active slot. `None` until the applet is bound.
    pub(crate) fn snapshot(&self) -> Option<ActiveApplet> {
        self.id.map(|id| ActiveApplet {
            id,
            layout: self.layout,
            privileges: self.privileges,
        })
    }

    /// Check that the applet may be run now.
    pub(crate) fn check_runnable(&self) -> Result<(), LifecycleError> {
        match self.state {
            AppletState::Ready => Ok(()),
            AppletState::Running if self.task.is_alive() => Ok(()),
            state => Err(LifecycleError::InvalidState(state)),
        }
    }

    /// Push the staged startup call, if any, with a fresh seed.
    pub(crate) fn start(&mut self, seed: u32) -> Result<(), LifecycleError> {
        if !self.pending_start {
            return Ok(());
        }
        let call = StartupCall {
            entry: self.header.startup,
            cmd: self.cmd,
            args: &self.args.inner()[..self.args_len],
            seed,
        };
        self.task.push_call(&call)?;
        self.pending_start = false;
        Ok(())
    }

    /// Hand the CPU to the task until it comes back.
    pub(crate) fn resume(&mut self, syscalls: &dyn SyscallHandler) -> TaskExit {
        self.state = AppletState::Running;
        let exit = self.task.yield_to(syscalls);
        if let TaskExit::Fatal(_) = exit {
            self.task.kill();
        }
        self.last_exit = Some(exit);
        exit
    }

    /// Terminate the task with `fatal`, overriding what it reported.
    pub(crate) fn abort(&mut self, fatal: FatalExit) -> TaskExit {
        self.task.kill();
        let exit = TaskExit::Fatal(fatal);
        self.last_exit = Some(exit);
        exit
    }

    /// Kill the task and wipe per-run state.
    pub(crate) fn halt(&mut self) {
        self.task.kill();
        self.clear_args();
        self.pending_start = false;
        if self.state != AppletState::Uninitialized {
            self.state = AppletState::Stopped;
        }
    }

    fn clear_args(&mut self) {
        self.args.wipe();
        self.args_len = 0;
        self.cmd = 0;
    }
}

impl<T: Task + fmt::Debug> fmt::Debug for Applet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Applet")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("layout", &self.layout)
            .field("privileges", &self.privileges)
            .field("task", &self.task)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::Region;
    use crate::testing::{exit_with_args_len, MockTask};

    fn config() -> (AppletHeader, AppletLayout) {
        let layout = AppletLayout {
            code1: Region::new(0x3000, 0x3800).unwrap(),
            data1: Region::new(0x1000, 0x2000).unwrap(),
            ..AppletLayout::EMPTY
        };
        let header = AppletHeader {
            stack: Region::new(0x1c00, 0x2000).unwrap(),
            startup: 0x3000,
            delegate: CryptoDelegate::default(),
        };
        (header, layout)
    }

    fn bound() -> Applet<MockTask> {
        let (header, layout) = config();
        let mut applet = Applet::new(MockTask::new(exit_with_args_len));
        applet
            .bind(AppletId::new(7), header, layout, AppletPrivileges::empty())
            .unwrap();
        applet
    }

    #[test]
    fn test_bind_only_from_uninitialized_or_stopped() {
        let (header, layout) = config();
        let mut applet = bound();
        assert_eq!(
            applet.bind(AppletId::new(8), header, layout, AppletPrivileges::empty()),
            Err(LifecycleError::InvalidState(AppletState::Initialized))
        );
        applet.halt();
        assert!(applet
            .bind(AppletId::new(8), header, layout, AppletPrivileges::empty())
            .is_ok());
        assert_eq!(applet.id(), Some(AppletId::new(8)));
    }

    #[test]
    fn test_reset_requires_init() {
        let mut applet = Applet::new(MockTask::new(exit_with_args_len));
        assert_eq!(
            applet.reset(0, &[]),
            Err(LifecycleError::InvalidState(AppletState::Uninitialized))
        );
    }

    #[test]
    fn test_reset_stages_args() {
        let mut applet = bound();
        applet.reset(3, b"hello").unwrap();
        assert_eq!(applet.state(), AppletState::Ready);
        assert_eq!(applet.args(), b"hello");
        assert!(!applet.is_alive());
    }

    #[test]
    fn test_reset_rejects_oversized_argument() {
        let mut applet = bound();
        let big = [0u8; APPLET_MAX_ARG_SIZE + 1];
        assert_eq!(
            applet.reset(0, &big),
            Err(LifecycleError::ArgumentTooLarge(APPLET_MAX_ARG_SIZE + 1))
        );
        assert_eq!(applet.state(), AppletState::Initialized);
        assert!(applet.reset(0, &big[..APPLET_MAX_ARG_SIZE]).is_ok());
    }

    #[test]
    fn test_reset_rejects_entry_outside_code() {
        let (mut header, layout) = config();
        header.startup = 0x1000;
        let mut applet = Applet::new(MockTask::new(exit_with_args_len));
        applet
            .bind(AppletId::new(1), header, layout, AppletPrivileges::empty())
            .unwrap();
        assert_eq!(
            applet.reset(0, &[]),
            Err(LifecycleError::MalformedHeader(HeaderFault::Entry))
        );
        assert_eq!(applet.state(), AppletState::Initialized);
    }

    #[test]
    fn test_abort_kills_task() {
        let mut applet = bound();
        applet.reset(0, &[]).unwrap();
        applet.start(1).unwrap();
        assert!(applet.is_alive());

        let fatal = FatalExit::task("Access violation", file!(), line!());
        assert_eq!(applet.abort(fatal), TaskExit::Fatal(fatal));
        assert!(!applet.is_alive());
        assert_eq!(applet.last_exit(), Some(TaskExit::Fatal(fatal)));
    }

    #[test]
    fn test_halt_wipes_args() {
        let mut applet = bound();
        applet.reset(0, b"secret").unwrap();
        applet.halt();
        assert_eq!(applet.state(), AppletState::Stopped);
        assert!(applet.args().is_empty());
        assert!(applet.args.inner().iter().all(|&b| b == 0));
    }
}
