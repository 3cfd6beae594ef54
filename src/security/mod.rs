//! Security Primitives Module
//!
//! - Hardware key gating for AES operations
//! - Secret zeroization on drop
//!
//! # Security Properties
//! - Key legality is decided by one lookup table
//! - Buffers that carried secrets are cleared with volatile writes

pub mod key_gate;
pub mod zeroize;

pub use key_gate::{
    AesEngine, Direction, EngineError, ExecutionContext, KeyGate, KeyGateError, KeySelector,
};
pub use zeroize::{SecureWrapper, Zeroize};
