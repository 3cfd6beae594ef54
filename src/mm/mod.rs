//! Memory model for Warden
//!
//! Provides:
//! - Granule alignment and overflow-checked range arithmetic
//! - Regions and bounded region sets used to describe applet memory
//!
//! # Security Principles
//! - Every range is validated on construction
//! - Containment checks fail closed on overflow
//! - No dynamic allocation: region sets have a hard block cap

pub mod address;
pub mod region;

pub use region::{Region, RegionError, RegionSet};
