//! Hardware Key Gate
//!
//! Decides which hardware-resident AES key an execution context may use and
//! runs ECB operations through the platform's AES engine. Raw key material
//! never leaves the engine.
//!
//! # Policy
//! ```text
//! ┌─────────────────────┬──────┬──────┬─────────┬──────────────┐
//! │ context             │ DHUK │ BHK  │ XORK_SP │ XORK_SN      │
//! ├─────────────────────┼──────┼──────┼─────────┼──────────────┤
//! │ kernel-privileged   │ yes  │ yes  │ yes     │ no           │
//! │ kernel-unprivileged │ no   │ no   │ no      │ bound applet │
//! │ applet (syscall)    │ no   │ no   │ no      │ bound applet │
//! └─────────────────────┴──────┴──────┴─────────┴──────────────┘
//! ```
//! The table is [`POLICY`]; nothing else decides key legality.
//!
//! # Security Properties
//! - Denied requests fail before the engine or the output buffer is touched
//! - A denied selector is never replaced by another key
//! - Intermediate blocks are zeroized after use

use core::fmt;

use log::{debug, warn};

use super::zeroize::SecureBlock;
use crate::applet::AppletId;
use crate::config::AES_BLOCK_SIZE;

/// Hardware key selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum KeySelector {
    /// Device-unique hardware key (secure-privileged only).
    DeviceUnique = 0,
    /// Backup hardware key, shared with the boot stages.
    Backup = 1,
    /// XOR-combined key for the privileged tier.
    XorPrivileged = 2,
    /// XOR-combined key for the unprivileged tier.
    XorUnprivileged = 3,
}

impl KeySelector {
    const COUNT: usize = 4;

    #[inline]
    const fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u32> for KeySelector {
    type Error = KeyGateError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::DeviceUnique),
            1 => Ok(Self::Backup),
            2 => Ok(Self::XorPrivileged),
            3 => Ok(Self::XorUnprivileged),
            _ => Err(KeyGateError::UnknownKey),
        }
    }
}

/// The context a key request comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Kernel code running privileged.
    KernelPrivileged,
    /// Kernel code running unprivileged on behalf of an applet.
    KernelUnprivileged(AppletId),
    /// The applet itself, through a syscall.
    Applet(AppletId),
}

impl ExecutionContext {
    const COUNT: usize = 3;

    #[inline]
    const fn index(self) -> usize {
        match self {
            Self::KernelPrivileged => 0,
            Self::KernelUnprivileged(_) => 1,
            Self::Applet(_) => 2,
        }
    }

    /// The applet this context acts for, if any.
    #[inline]
    pub const fn applet(self) -> Option<AppletId> {
        match self {
            Self::KernelPrivileged => None,
            Self::KernelUnprivileged(id) | Self::Applet(id) => Some(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    Allow,
    Deny,
    /// Allowed only when the caller is the applet bound to the gate.
    BoundApplet,
}

use Rule::{Allow, BoundApplet, Deny};

/// Key legality indexed by `[context][selector]`.
const POLICY: [[Rule; KeySelector::COUNT]; ExecutionContext::COUNT] = [
    // DeviceUnique, Backup, XorPrivileged, XorUnprivileged
    [Allow, Allow, Allow, Deny],
    [Deny, Deny, Deny, BoundApplet],
    [Deny, Deny, Deny, BoundApplet],
];

/// ECB direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// Error reported by the AES engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// The engine is powered down.
    NotReady,
    /// The requested key could not be loaded.
    KeyUnavailable,
    /// Hardware fault during the operation.
    Fault,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "engine not ready"),
            Self::KeyUnavailable => write!(f, "hardware key unavailable"),
            Self::Fault => write!(f, "engine fault"),
        }
    }
}

/// Error type for key gate operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyGateError {
    /// The gate has not been initialized.
    NotInitialized,
    /// The selector is not legal in the calling context.
    Denied,
    /// Raw selector value does not name a key.
    UnknownKey,
    /// Input is not a whole number of AES blocks.
    InvalidLength,
    /// Output is shorter than the input.
    BufferTooSmall,
    /// The engine failed.
    Engine(EngineError),
}

impl fmt::Display for KeyGateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "key gate not initialized"),
            Self::Denied => write!(f, "key not permitted in this context"),
            Self::UnknownKey => write!(f, "unknown key selector"),
            Self::InvalidLength => write!(f, "length is not a multiple of the block size"),
            Self::BufferTooSmall => write!(f, "output buffer too small"),
            Self::Engine(e) => write!(f, "engine error: {}", e),
        }
    }
}

impl From<EngineError> for KeyGateError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

/// A hardware AES engine with internal key slots.
pub trait AesEngine {
    /// Power up the engine and its key-derivation state.
    fn init(&mut self) -> Result<(), EngineError>;

    /// Power down the engine and clear its key state.
    fn deinit(&mut self);

    /// Transform one block in place with the hardware key `key`.
    fn ecb_block(
        &mut self,
        key: KeySelector,
        direction: Direction,
        block: &mut [u8; AES_BLOCK_SIZE],
    ) -> Result<(), EngineError>;
}

/// Policy layer in front of the AES engine.
#[derive(Debug)]
pub struct KeyGate<E: AesEngine> {
    engine: E,
    initialized: bool,
    /// Applet allowed to use `XorUnprivileged`.
    bound: Option<AppletId>,
}

impl<E: AesEngine> KeyGate<E> {
    pub const fn new(engine: E) -> Self {
        Self {
            engine,
            initialized: false,
            bound: None,
        }
    }

    /// Bring up the engine. Calling it again is a no-op.
    pub fn init(&mut self) -> Result<(), KeyGateError> {
        if !self.initialized {
            self.engine.init()?;
            self.initialized = true;
            debug!("[KEYGATE] engine initialized");
        }
        Ok(())
    }

    /// Tear down the engine and drop the applet binding.
    pub fn deinit(&mut self) {
        if self.initialized {
            self.engine.deinit();
            self.initialized = false;
        }
        self.bound = None;
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Bind the applet allowed to use the unprivileged key, or unbind.
    pub fn set_applet(&mut self, applet: Option<AppletId>) {
        debug!("[KEYGATE] bound applet: {:?}", applet);
        self.bound = applet;
    }

    /// The applet currently bound to the gate.
    #[inline]
    pub fn bound_applet(&self) -> Option<AppletId> {
        self.bound
    }

    /// Drop the binding if it belongs to `applet`.
    pub(crate) fn release(&mut self, applet: AppletId) {
        if self.bound == Some(applet) {
            self.bound = None;
        }
    }

    /// Check if `context` may use `key`.
    pub fn authorize(&self, context: ExecutionContext, key: KeySelector) -> Result<(), KeyGateError> {
        let allowed = match POLICY[context.index()][key.index()] {
            Allow => true,
            Deny => false,
            BoundApplet => self.bound.is_some() && context.applet() == self.bound,
        };

        if allowed {
            Ok(())
        } else {
            warn!("[KEYGATE] {:?} denied for {:?}", key, context);
            Err(KeyGateError::Denied)
        }
    }

    /// AES-ECB encrypt `input` into `output` with a hardware key.
    pub fn encrypt(
        &mut self,
        context: ExecutionContext,
        key: KeySelector,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<(), KeyGateError> {
        self.process(context, key, Direction::Encrypt, input, output)
    }

    /// AES-ECB decrypt `input` into `output` with a hardware key.
    pub fn decrypt(
        &mut self,
        context: ExecutionContext,
        key: KeySelector,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<(), KeyGateError> {
        self.process(context, key, Direction::Decrypt, input, output)
    }

    /// Authorize, validate sizes, then run the engine block by block.
    ///
    /// Denials and size errors leave `output` untouched. An engine failure
    /// on a later block leaves the blocks before it already written.
    pub fn process(
        &mut self,
        context: ExecutionContext,
        key: KeySelector,
        direction: Direction,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<(), KeyGateError> {
        self.authorize(context, key)?;

        if !self.initialized {
            return Err(KeyGateError::NotInitialized);
        }
        if input.len() % AES_BLOCK_SIZE != 0 {
            return Err(KeyGateError::InvalidLength);
        }
        if output.len() < input.len() {
            return Err(KeyGateError::BufferTooSmall);
        }

        let mut block = SecureBlock::default();
        for (src, dst) in input
            .chunks_exact(AES_BLOCK_SIZE)
            .zip(output.chunks_exact_mut(AES_BLOCK_SIZE))
        {
            block.inner_mut().copy_from_slice(src);
            self.engine.ecb_block(key, direction, block.inner_mut())?;
            dst.copy_from_slice(block.inner());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockEngine;

    const A: AppletId = AppletId::new(1);
    const B: AppletId = AppletId::new(2);

    fn gate() -> KeyGate<MockEngine> {
        let mut gate = KeyGate::new(MockEngine::new());
        gate.init().unwrap();
        gate
    }

    #[test]
    fn test_privileged_matrix() {
        let gate = gate();
        let ctx = ExecutionContext::KernelPrivileged;
        assert!(gate.authorize(ctx, KeySelector::DeviceUnique).is_ok());
        assert!(gate.authorize(ctx, KeySelector::Backup).is_ok());
        assert!(gate.authorize(ctx, KeySelector::XorPrivileged).is_ok());
        assert_eq!(
            gate.authorize(ctx, KeySelector::XorUnprivileged),
            Err(KeyGateError::Denied)
        );
    }

    #[test]
    fn test_unprivileged_contexts_never_get_privileged_keys() {
        let mut gate = gate();
        gate.set_applet(Some(A));
        for ctx in [ExecutionContext::KernelUnprivileged(A), ExecutionContext::Applet(A)] {
            for key in [
                KeySelector::DeviceUnique,
                KeySelector::Backup,
                KeySelector::XorPrivileged,
            ] {
                assert_eq!(gate.authorize(ctx, key), Err(KeyGateError::Denied));
            }
        }
    }

    #[test]
    fn test_unprivileged_key_requires_binding() {
        let mut gate = gate();
        let input = [0x11u8; 16];
        let mut output = [0u8; 16];

        assert_eq!(
            gate.encrypt(ExecutionContext::Applet(A), KeySelector::XorUnprivileged, &input, &mut output),
            Err(KeyGateError::Denied)
        );
        assert_eq!(output, [0u8; 16]);

        gate.set_applet(Some(A));
        assert!(gate
            .encrypt(ExecutionContext::Applet(A), KeySelector::XorUnprivileged, &input, &mut output)
            .is_ok());
        assert_ne!(output, [0u8; 16]);

        let mut other = [0u8; 16];
        assert_eq!(
            gate.encrypt(ExecutionContext::Applet(B), KeySelector::XorUnprivileged, &input, &mut other),
            Err(KeyGateError::Denied)
        );
        assert_eq!(
            gate.encrypt(
                ExecutionContext::KernelUnprivileged(B),
                KeySelector::XorUnprivileged,
                &input,
                &mut other
            ),
            Err(KeyGateError::Denied)
        );
        assert_eq!(other, [0u8; 16]);
    }

    #[test]
    fn test_denied_request_skips_engine() {
        let mut gate = gate();
        let mut output = [0xAAu8; 32];
        let _ = gate.encrypt(
            ExecutionContext::Applet(A),
            KeySelector::DeviceUnique,
            &[0u8; 32],
            &mut output,
        );
        assert_eq!(gate.engine.blocks_processed(), 0);
        assert_eq!(output, [0xAAu8; 32]);
    }

    #[test]
    fn test_round_trip_and_key_separation() {
        let mut gate = gate();
        let ctx = ExecutionContext::KernelPrivileged;
        let plain = [0x5Au8; 32];
        let mut dhuk = [0u8; 32];
        let mut bhk = [0u8; 32];
        gate.encrypt(ctx, KeySelector::DeviceUnique, &plain, &mut dhuk).unwrap();
        gate.encrypt(ctx, KeySelector::Backup, &plain, &mut bhk).unwrap();
        assert_ne!(dhuk, bhk);

        let mut back = [0u8; 32];
        gate.decrypt(ctx, KeySelector::DeviceUnique, &dhuk, &mut back).unwrap();
        assert_eq!(back, plain);
    }

    #[test]
    fn test_engine_fault_keeps_earlier_blocks() {
        let mut gate = KeyGate::new(MockEngine::failing_after(1));
        gate.init().unwrap();
        let plain = [0x5Au8; 48];
        let mut output = [0u8; 48];
        assert_eq!(
            gate.encrypt(ExecutionContext::KernelPrivileged, KeySelector::Backup, &plain, &mut output),
            Err(KeyGateError::Engine(EngineError::Fault))
        );
        let sealed = MockEngine::expected(KeySelector::Backup, 0x5A);
        assert!(output[..16].iter().all(|&b| b == sealed));
        assert!(output[16..].iter().all(|&b| b == 0));
        assert_eq!(gate.engine.blocks_processed(), 1);
    }

    #[test]
    fn test_size_validation() {
        let mut gate = gate();
        let ctx = ExecutionContext::KernelPrivileged;
        let mut out = [0u8; 16];
        assert_eq!(
            gate.encrypt(ctx, KeySelector::Backup, &[0u8; 15], &mut out),
            Err(KeyGateError::InvalidLength)
        );
        assert_eq!(
            gate.encrypt(ctx, KeySelector::Backup, &[0u8; 32], &mut out),
            Err(KeyGateError::BufferTooSmall)
        );
    }

    #[test]
    fn test_requires_init() {
        let mut gate = KeyGate::new(MockEngine::new());
        let mut out = [0u8; 16];
        assert_eq!(
            gate.encrypt(ExecutionContext::KernelPrivileged, KeySelector::Backup, &[0u8; 16], &mut out),
            Err(KeyGateError::NotInitialized)
        );
        gate.init().unwrap();
        gate.set_applet(Some(A));
        gate.deinit();
        assert!(!gate.is_initialized());
        assert_eq!(gate.bound_applet(), None);
    }

    #[test]
    fn test_release_only_own_binding() {
        let mut gate = gate();
        gate.set_applet(Some(A));
        gate.release(B);
        assert_eq!(gate.bound_applet(), Some(A));
        gate.release(A);
        assert_eq!(gate.bound_applet(), None);
    }

    #[test]
    fn test_selector_decoding() {
        assert_eq!(KeySelector::try_from(3), Ok(KeySelector::XorUnprivileged));
        assert_eq!(KeySelector::try_from(4), Err(KeyGateError::UnknownKey));
    }
}
