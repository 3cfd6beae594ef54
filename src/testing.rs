//! Test doubles for the external collaborators: task primitive, AES engine
//! and board services.

use core::mem::size_of;

use crate::config::{AES_BLOCK_SIZE, APPLET_MAX_ARG_SIZE};
use crate::mm::Region;
use crate::platform::Platform;
use crate::security::key_gate::{AesEngine, Direction, EngineError, KeySelector};
use crate::syscall::SyscallHandler;
use crate::task::{FatalExit, StartupCall, Task, TaskError, TaskExit};

/// Seed returned by [`TestPlatform`].
pub const MOCK_SEED: u32 = 0x1234_5678;

/// Applet body: runs with the kernel's syscall surface and the startup args.
pub type Script = fn(&dyn SyscallHandler, &[u8]) -> TaskExit;

/// Exits with the length of the startup argument blob.
pub fn exit_with_args_len(_sys: &dyn SyscallHandler, args: &[u8]) -> TaskExit {
    TaskExit::Exited(args.len() as i32)
}

/// Encode addresses into an argument blob.
pub fn pack_addrs(addrs: &[usize]) -> ([u8; APPLET_MAX_ARG_SIZE], usize) {
    let mut blob = [0u8; APPLET_MAX_ARG_SIZE];
    for (i, addr) in addrs.iter().enumerate() {
        blob[i * size_of::<usize>()..(i + 1) * size_of::<usize>()]
            .copy_from_slice(&addr.to_le_bytes());
    }
    (blob, addrs.len() * size_of::<usize>())
}

/// Decode the `index`th address of an argument blob.
pub fn addr_arg(args: &[u8], index: usize) -> usize {
    let mut raw = [0u8; size_of::<usize>()];
    raw.copy_from_slice(&args[index * size_of::<usize>()..(index + 1) * size_of::<usize>()]);
    usize::from_le_bytes(raw)
}

/// What the task primitive was asked to start with.
#[derive(Debug, Clone, Copy)]
pub struct StartupRecord {
    pub entry: usize,
    pub cmd: u32,
    pub seed: u32,
    args: [u8; APPLET_MAX_ARG_SIZE],
    args_len: usize,
}

impl StartupRecord {
    pub fn args(&self) -> &[u8] {
        &self.args[..self.args_len]
    }
}

/// Task primitive that runs a [`Script`] instead of switching contexts.
pub struct MockTask {
    script: Script,
    stack: Option<Region>,
    startup: Option<StartupRecord>,
    alive: bool,
    pushed: u32,
    resumes: u32,
}

impl MockTask {
    pub const MIN_STACK: usize = 64;

    pub fn new(script: Script) -> Self {
        Self {
            script,
            stack: None,
            startup: None,
            alive: false,
            pushed: 0,
            resumes: 0,
        }
    }

    pub fn startup(&self) -> Option<&StartupRecord> {
        self.startup.as_ref()
    }

    pub fn pushed_calls(&self) -> u32 {
        self.pushed
    }

    pub fn resumes(&self) -> u32 {
        self.resumes
    }
}

impl Task for MockTask {
    fn reset(&mut self, stack: Region) -> Result<(), TaskError> {
        if stack.size() < Self::MIN_STACK {
            return Err(TaskError::StackTooSmall);
        }
        self.stack = Some(stack);
        self.startup = None;
        self.alive = false;
        Ok(())
    }

    fn push_call(&mut self, call: &StartupCall<'_>) -> Result<(), TaskError> {
        if self.stack.is_none() {
            return Err(TaskError::InvalidState);
        }
        let mut args = [0u8; APPLET_MAX_ARG_SIZE];
        args[..call.args.len()].copy_from_slice(call.args);
        self.startup = Some(StartupRecord {
            entry: call.entry,
            cmd: call.cmd,
            seed: call.seed,
            args,
            args_len: call.args.len(),
        });
        self.alive = true;
        self.pushed += 1;
        Ok(())
    }

    fn yield_to(&mut self, syscalls: &dyn SyscallHandler) -> TaskExit {
        let Some(startup) = self.startup else {
            return TaskExit::Fatal(FatalExit::task("no startup call", file!(), line!()));
        };
        self.resumes += 1;
        let exit = (self.script)(syscalls, startup.args());
        if exit.is_terminal() {
            self.alive = false;
        }
        exit
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    fn kill(&mut self) {
        self.alive = false;
    }
}

/// AES engine stand-in: XORs every byte with a per-key constant.
#[derive(Debug, Default)]
pub struct MockEngine {
    powered: bool,
    blocks: usize,
    /// Fail with `EngineError::Fault` once this many blocks went through.
    fail_after: Option<usize>,
}

impl MockEngine {
    pub const fn new() -> Self {
        Self {
            powered: false,
            blocks: 0,
            fail_after: None,
        }
    }

    /// Engine that faults after `blocks` successful blocks.
    pub const fn failing_after(blocks: usize) -> Self {
        Self {
            powered: false,
            blocks: 0,
            fail_after: Some(blocks),
        }
    }

    fn key_byte(key: KeySelector) -> u8 {
        match key {
            KeySelector::DeviceUnique => 0xA5,
            KeySelector::Backup => 0x3C,
            KeySelector::XorPrivileged => 0x0F,
            KeySelector::XorUnprivileged => 0xF0,
        }
    }

    /// Ciphertext byte produced for `plain` under `key`.
    pub fn expected(key: KeySelector, plain: u8) -> u8 {
        plain ^ Self::key_byte(key)
    }

    pub fn blocks_processed(&self) -> usize {
        self.blocks
    }
}

impl AesEngine for MockEngine {
    fn init(&mut self) -> Result<(), EngineError> {
        self.powered = true;
        Ok(())
    }

    fn deinit(&mut self) {
        self.powered = false;
    }

    fn ecb_block(
        &mut self,
        key: KeySelector,
        _direction: Direction,
        block: &mut [u8; AES_BLOCK_SIZE],
    ) -> Result<(), EngineError> {
        if !self.powered {
            return Err(EngineError::NotReady);
        }
        if self.fail_after == Some(self.blocks) {
            return Err(EngineError::Fault);
        }
        let k = Self::key_byte(key);
        for byte in block.iter_mut() {
            *byte ^= k;
        }
        self.blocks += 1;
        Ok(())
    }
}

/// Board services for tests. Halting panics so tests can observe it.
#[derive(Debug, Clone, Copy)]
pub struct TestPlatform;

impl Platform for TestPlatform {
    fn random_u32(&self) -> u32 {
        MOCK_SEED
    }

    fn halt(&self, fatal: &FatalExit) -> ! {
        panic!("system halt: {}", fatal)
    }
}
