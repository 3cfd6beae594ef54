//! Kernel Coordinator
//!
//! The single object that owns the shared state of the isolation core:
//! - the active applet slot consulted by every probe
//! - the key gate and its applet binding
//! - the currently displayed framebuffer
//!
//! # Concurrency
//! There is one hardware thread. Applet code only runs inside [`Kernel::run`]
//! and reaches back into the kernel synchronously through
//! [`crate::syscall::SyscallHandler`]. The slots sit behind `spin::Mutex`
//! so each update is a single assignment and the kernel can live in a
//! `static`; no lock is held while the applet runs.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use log::{error, info, warn};
use spin::{Mutex, MutexGuard};

use crate::applet::{
    ActiveApplet, Applet, AppletHeader, AppletId, AppletLayout, AppletPrivileges, LifecycleError,
};
use crate::config::KernelConfig;
#[cfg(feature = "framebuffer")]
use crate::mm::Region;
use crate::platform::Platform;
use crate::security::key_gate::{
    AesEngine, Direction, ExecutionContext, KeyGate, KeyGateError, KeySelector,
};
use crate::syscall::{Mediator, ACCESS_VIOLATION};
use crate::task::{FatalExit, FatalScope, Task, TaskExit};

/// The applet isolation kernel.
pub struct Kernel<E: AesEngine, P: Platform> {
    config: KernelConfig,
    platform: P,
    /// The applet bound to the running task. Written by `run`/`stop` only.
    active: Mutex<Option<ActiveApplet>>,
    key_gate: Mutex<KeyGate<E>>,
    #[cfg(feature = "framebuffer")]
    framebuffer: Mutex<Option<Region>>,
    next_id: AtomicU32,
    /// Set only while the applet task holds the CPU inside `run`.
    executing: AtomicBool,
    /// First task-scoped fatal exit raised during the current `run`.
    pending_fatal: Mutex<Option<FatalExit>>,
}

impl<E: AesEngine, P: Platform> Kernel<E, P> {
    pub const fn new(config: KernelConfig, engine: E, platform: P) -> Self {
        Self {
            config,
            platform,
            active: Mutex::new(None),
            key_gate: Mutex::new(KeyGate::new(engine)),
            #[cfg(feature = "framebuffer")]
            framebuffer: Mutex::new(None),
            next_id: AtomicU32::new(1),
            executing: AtomicBool::new(false),
            pending_fatal: Mutex::new(None),
        }
    }

    #[inline]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[inline]
    pub fn platform(&self) -> &P {
        &self.platform
    }

    // ------------------------------------------------------------------
    // Applet lifecycle
    // ------------------------------------------------------------------

    /// Bind static configuration to `applet` and give it a fresh identity.
    ///
    /// Allowed only on an uninitialized or stopped applet.
    pub fn init<T: Task>(
        &self,
        applet: &mut Applet<T>,
        header: AppletHeader,
        layout: AppletLayout,
        privileges: AppletPrivileges,
    ) -> Result<AppletId, LifecycleError> {
        let id = AppletId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        applet.bind(id, header, layout, privileges)?;
        info!("[APPLET] {} initialized: {:?}", id, layout);
        Ok(id)
    }

    /// Prepare `applet` to start from its entry point with `cmd` and `arg`.
    ///
    /// Does not run anything; see [`Kernel::run`].
    pub fn reset<T: Task>(
        &self,
        applet: &mut Applet<T>,
        cmd: u32,
        arg: &[u8],
    ) -> Result<(), LifecycleError> {
        if let Err(e) = applet.reset(cmd, arg) {
            warn!("[APPLET] reset failed: {}", e);
            return Err(e);
        }
        info!("[APPLET] {:?} reset (cmd {}, {} arg bytes)", applet.id(), cmd, arg.len());
        Ok(())
    }

    /// Activate `applet` and run it until its task yields, exits or faults.
    ///
    /// Faults inside the applet are not errors: they come back as
    /// [`TaskExit::Fatal`] after the task has been terminated. A fatal exit
    /// raised through [`Kernel::handle_access_violation`] wins over whatever
    /// the task reports. Errors are returned only when the applet cannot be
    /// run at all, in which case no layout is activated.
    ///
    /// The applet stays active after this returns; [`Kernel::stop`] must be
    /// called before another applet can run.
    pub fn run<T: Task>(&self, applet: &mut Applet<T>) -> Result<TaskExit, LifecycleError> {
        applet.check_runnable()?;
        let Some(me) = applet.snapshot() else {
            return Err(LifecycleError::InvalidState(applet.state()));
        };

        {
            let mut active = self.active.lock();
            if let Some(other) = *active {
                if other.id != me.id {
                    return Err(LifecycleError::AnotherAppletActive(other.id));
                }
            }
            *active = Some(me);
        }

        if let Err(e) = applet.start(self.platform.random_u32()) {
            *self.active.lock() = None;
            warn!("[APPLET] {} failed to start: {}", me.id, e);
            return Err(e);
        }

        *self.pending_fatal.lock() = None;
        self.executing.store(true, Ordering::SeqCst);
        let reported = applet.resume(self);
        self.executing.store(false, Ordering::SeqCst);

        let exit = match self.pending_fatal.lock().take() {
            Some(fatal) => applet.abort(fatal),
            None => reported,
        };
        match exit {
            TaskExit::Yielded => info!("[APPLET] {} yielded", me.id),
            TaskExit::Exited(code) => info!("[APPLET] {} exited with {}", me.id, code),
            TaskExit::Fatal(fatal) => error!("[APPLET] {} terminated: {}", me.id, fatal),
        }
        Ok(exit)
    }

    /// Release everything held by `applet`, whatever state it is in.
    ///
    /// Kills the task, deactivates the layout and drops the key gate binding.
    pub fn stop<T: Task>(&self, applet: &mut Applet<T>) {
        applet.halt();

        if let Some(id) = applet.id() {
            {
                let mut active = self.active.lock();
                if matches!(*active, Some(a) if a.id == id) {
                    *active = None;
                }
            }
            self.key_gate.lock().release(id);
            info!("[APPLET] {} stopped", id);
        }
    }

    /// Forget the active applet without touching it.
    ///
    /// Recovery for an applet that was dropped without [`Kernel::stop`]:
    /// deactivates its layout and drops its key gate binding.
    pub fn reset_active(&self) {
        if let Some(stale) = self.active.lock().take() {
            self.key_gate.lock().release(stale.id);
            warn!("[APPLET] {} deactivated without stop", stale.id);
        }
    }

    /// The currently active applet, if any.
    #[inline]
    pub fn active(&self) -> Option<ActiveApplet> {
        *self.active.lock()
    }

    // ------------------------------------------------------------------
    // Access mediation
    // ------------------------------------------------------------------

    /// Snapshot of everything the probes consult.
    pub fn mediator(&self) -> Mediator {
        let mediator = Mediator::new(self.active(), self.config.assets);
        #[cfg(feature = "framebuffer")]
        let mediator = mediator.with_framebuffer(*self.framebuffer.lock());
        mediator
    }

    /// Check if the active applet may read `[addr, addr + len)`.
    pub fn probe_read(&self, addr: usize, len: usize) -> bool {
        self.mediator().probe_read(addr, len)
    }

    /// Check if the active applet may write `[addr, addr + len)`.
    pub fn probe_write(&self, addr: usize, len: usize) -> bool {
        self.mediator().probe_write(addr, len)
    }

    /// Check if `addr` lies in the active applet's code.
    pub fn probe_execute(&self, addr: usize) -> bool {
        self.mediator().probe_execute(addr)
    }

    /// Terminate the active applet with "Access violation" at `file:line`.
    ///
    /// Only a violation raised while the applet task is executing is
    /// task-scoped: the task is killed when control returns to
    /// [`Kernel::run`], whatever it reports. Anywhere else the violation
    /// happened in kernel context and the device halts.
    pub fn handle_access_violation(&self, file: &'static str, line: u32) -> FatalExit {
        let fatal = if self.executing.load(Ordering::SeqCst) {
            FatalExit::task(ACCESS_VIOLATION, file, line)
        } else {
            FatalExit::system(ACCESS_VIOLATION, file, line)
        };
        self.fatal_exit(fatal)
    }

    /// The single fatal-exit path.
    ///
    /// Task-scoped exits are recorded for `run` to enforce and handed back
    /// to the caller; system-scoped exits halt the platform.
    pub fn fatal_exit(&self, fatal: FatalExit) -> FatalExit {
        match fatal.scope {
            FatalScope::Task => {
                error!("[FATAL] applet: {}", fatal);
                let mut pending = self.pending_fatal.lock();
                if pending.is_none() {
                    *pending = Some(fatal);
                }
                fatal
            }
            FatalScope::System => {
                error!("[FATAL] kernel: {}", fatal);
                self.platform.halt(&fatal)
            }
        }
    }

    /// Set the framebuffer currently scanned out by the display.
    #[cfg(feature = "framebuffer")]
    pub fn set_active_framebuffer(&self, framebuffer: Option<Region>) {
        *self.framebuffer.lock() = framebuffer;
    }

    // ------------------------------------------------------------------
    // Key gate
    // ------------------------------------------------------------------

    /// Exclusive access to the key gate (init, deinit, binding).
    #[inline]
    pub fn key_gate(&self) -> MutexGuard<'_, KeyGate<E>> {
        self.key_gate.lock()
    }

    /// Bind `applet` as the one allowed to use the unprivileged key.
    pub fn bind_key_applet<T: Task>(&self, applet: Option<&Applet<T>>) {
        self.key_gate.lock().set_applet(applet.and_then(|a| a.id()));
    }

    /// AES-ECB with a hardware key from kernel-privileged context.
    pub fn aes_ecb(
        &self,
        direction: Direction,
        key: KeySelector,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<(), KeyGateError> {
        self.key_gate
            .lock()
            .process(ExecutionContext::KernelPrivileged, key, direction, input, output)
    }

    /// AES-ECB from kernel code running unprivileged for the active applet.
    ///
    /// Fails closed when no applet is active.
    pub fn aes_ecb_unprivileged(
        &self,
        direction: Direction,
        key: KeySelector,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<(), KeyGateError> {
        let Some(active) = self.active() else {
            return Err(KeyGateError::Denied);
        };
        self.key_gate.lock().process(
            ExecutionContext::KernelUnprivileged(active.id),
            key,
            direction,
            input,
            output,
        )
    }
}
