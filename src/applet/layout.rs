//! Applet Memory Layout
//!
//! The memory footprint of one applet: two code areas and two data areas.
//! The layout is the authoritative boundary the syscall probes check against.
//!
//! ```text
//! ┌──────────────┬──────────────────────────┐
//! │ area         │ applet access            │
//! ├──────────────┼──────────────────────────┤
//! │ data1, data2 │ READ | WRITE             │
//! │ code1, code2 │ READ | EXECUTE           │
//! └──────────────┴──────────────────────────┘
//! ```

use bitflags::bitflags;

use crate::mm::{Region, RegionSet};

bitflags! {
    /// Kinds of access an applet may request on a memory range.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Access: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        const READ_EXECUTE = Self::READ.bits() | Self::EXECUTE.bits();
    }
}

/// Error type for layout construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    /// More than two blocks supplied for the code or data class.
    TooManyAreas,
}

impl core::fmt::Display for LayoutError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::TooManyAreas => write!(f, "layout holds at most two areas per class"),
        }
    }
}

/// Memory areas assigned to one applet. Unused slots are empty regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppletLayout {
    pub code1: Region,
    pub code2: Region,
    pub data1: Region,
    pub data2: Region,
}

impl AppletLayout {
    /// Layout with no memory at all.
    pub const EMPTY: Self = Self {
        code1: Region::EMPTY,
        code2: Region::EMPTY,
        data1: Region::EMPTY,
        data2: Region::EMPTY,
    };

    /// Compose a layout from firmware-provided code and data block lists.
    pub fn from_sets(code: &RegionSet, data: &RegionSet) -> Result<Self, LayoutError> {
        let [code1, code2] = Self::split(code)?;
        let [data1, data2] = Self::split(data)?;
        Ok(Self {
            code1,
            code2,
            data1,
            data2,
        })
    }

    fn split(set: &RegionSet) -> Result<[Region; 2], LayoutError> {
        match set.blocks() {
            [] => Ok([Region::EMPTY; 2]),
            [a] => Ok([*a, Region::EMPTY]),
            [a, b] => Ok([*a, *b]),
            _ => Err(LayoutError::TooManyAreas),
        }
    }

    /// Every area together with the access it grants.
    pub fn areas(&self) -> [(Region, Access); 4] {
        [
            (self.data1, Access::READ_WRITE),
            (self.data2, Access::READ_WRITE),
            (self.code1, Access::READ_EXECUTE),
            (self.code2, Access::READ_EXECUTE),
        ]
    }

    /// Check if `[addr, addr + len)` lies in one area granting `access`.
    pub fn permits(&self, addr: usize, len: usize, access: Access) -> bool {
        self.areas()
            .iter()
            .any(|(region, granted)| granted.contains(access) && region.contains(addr, len))
    }

    /// Check if `addr` is an instruction address inside a code area.
    pub fn is_code(&self, addr: usize) -> bool {
        self.code1.contains_addr(addr) || self.code2.contains_addr(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> AppletLayout {
        AppletLayout {
            code1: Region::new(0x3000, 0x3800).unwrap(),
            data1: Region::new(0x1000, 0x2000).unwrap(),
            ..AppletLayout::EMPTY
        }
    }

    #[test]
    fn test_permits_by_access() {
        let layout = layout();
        assert!(layout.permits(0x1000, 0x100, Access::READ_WRITE));
        assert!(layout.permits(0x3000, 0x10, Access::READ));
        assert!(!layout.permits(0x3000, 0x10, Access::WRITE));
        assert!(!layout.permits(0x1000, 0x10, Access::EXECUTE));
        assert!(!layout.permits(0x3900, 0x10, Access::READ));
    }

    #[test]
    fn test_is_code() {
        let layout = layout();
        assert!(layout.is_code(0x3000));
        assert!(layout.is_code(0x37ff));
        assert!(!layout.is_code(0x3800));
        assert!(!layout.is_code(0x1000));
        assert!(!layout.is_code(0));
    }

    #[test]
    fn test_from_sets() {
        let mut code = RegionSet::new();
        code.add_range(0x3000, 0x3800).unwrap();
        let mut data = RegionSet::new();
        data.add_range(0x1000, 0x2000).unwrap();
        data.add_range(0x5000, 0x6000).unwrap();

        let layout = AppletLayout::from_sets(&code, &data).unwrap();
        assert_eq!(layout.code1, Region::new(0x3000, 0x3800).unwrap());
        assert!(layout.code2.is_empty());
        assert_eq!(layout.data2, Region::new(0x5000, 0x6000).unwrap());

        data.add_range(0x7000, 0x7100).unwrap();
        assert_eq!(
            AppletLayout::from_sets(&code, &data),
            Err(LayoutError::TooManyAreas)
        );
    }
}
