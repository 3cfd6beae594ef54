//! Memory Regions
//!
//! Describes address ranges used to build applet memory layouts and the
//! kernel's own memory classes (all RAM, stack, etc.).
//!
//! # Design
//! - `Region` is a single `[start, end)` range aligned to the protection granule
//! - `RegionSet` holds up to `MEMREGION_MAX_BLOCKS` non-overlapping regions
//!   sorted by start address, in a fixed array plus a length counter
//! - Adding a range trims whatever it overlaps, but adjacent or overlapping
//!   blocks are never merged. A few extra blocks are tolerated.
//!
//! # Security Properties
//! - Containment requires the whole range to lie inside a single block
//! - `addr + len` overflow is never contained
//! - A failed mutation leaves the set untouched

use core::fmt;
use core::ptr;
use core::sync::atomic::{compiler_fence, Ordering};

use super::address::{is_aligned, range_end};
use crate::config::MEMREGION_MAX_BLOCKS;

/// Error type for region operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionError {
    /// Start or end is not aligned to the protection granule.
    Misaligned,
    /// Start address is above the end address.
    Inverted,
    /// The operation would need more than `MEMREGION_MAX_BLOCKS` blocks.
    CapacityExceeded,
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Misaligned => write!(f, "range bounds are not granule aligned"),
            Self::Inverted => write!(f, "range start is above its end"),
            Self::CapacityExceeded => write!(f, "region block capacity exceeded"),
        }
    }
}

/// A contiguous address range `[start, end)`.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    start: usize,
    end: usize,
}

impl Region {
    /// The empty region at address zero. Used for unused layout slots.
    pub const EMPTY: Self = Self { start: 0, end: 0 };

    /// Create a region after validating alignment and ordering.
    pub const fn new(start: usize, end: usize) -> Result<Self, RegionError> {
        if !is_aligned(start) || !is_aligned(end) {
            return Err(RegionError::Misaligned);
        }
        if start > end {
            return Err(RegionError::Inverted);
        }
        Ok(Self { start, end })
    }

    /// Create a region from a start address and a size.
    pub const fn with_size(start: usize, size: usize) -> Result<Self, RegionError> {
        match range_end(start, size) {
            Some(end) => Self::new(start, end),
            None => Err(RegionError::Inverted),
        }
    }

    /// Create a compiled-in region.
    ///
    /// # Panics
    /// Panics (at compile time when used in a `const`) if the bounds are
    /// misaligned or inverted.
    pub const fn fixed(start: usize, end: usize) -> Self {
        match Self::new(start, end) {
            Ok(region) => region,
            Err(_) => panic!("invalid compiled-in region"),
        }
    }

    /// Start address (inclusive).
    #[inline]
    pub const fn start(&self) -> usize {
        self.start
    }

    /// End address (exclusive).
    #[inline]
    pub const fn end(&self) -> usize {
        self.end
    }

    /// Size in bytes.
    #[inline]
    pub const fn size(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Check if `[addr, addr + len)` lies entirely within this region.
    ///
    /// Zero-length ranges are contained anywhere; a wrapping range never is.
    #[inline]
    pub const fn contains(&self, addr: usize, len: usize) -> bool {
        if len == 0 {
            return true;
        }
        match range_end(addr, len) {
            Some(end) => addr >= self.start && end <= self.end,
            None => false,
        }
    }

    /// Check if a single address falls inside this region.
    #[inline]
    pub const fn contains_addr(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Check if `other` lies entirely within this region.
    #[inline]
    pub const fn covers(&self, other: &Region) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    /// Check if two non-empty regions share at least one byte.
    #[inline]
    pub const fn overlaps(&self, other: &Region) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Region({:#010x}..{:#010x})", self.start, self.end)
    }
}

/// A bounded set of non-overlapping memory blocks ordered by start address.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RegionSet {
    blocks: [Region; MEMREGION_MAX_BLOCKS],
    len: usize,
}

impl RegionSet {
    /// Create a new empty set.
    pub const fn new() -> Self {
        Self {
            blocks: [Region::EMPTY; MEMREGION_MAX_BLOCKS],
            len: 0,
        }
    }

    /// Build a set from a compiled-in block list.
    pub fn from_blocks(blocks: &[Region]) -> Result<Self, RegionError> {
        let mut set = Self::new();
        for block in blocks {
            set.add_range(block.start, block.end)?;
        }
        Ok(set)
    }

    /// Number of blocks in the set.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The blocks, ordered by start address.
    #[inline]
    pub fn blocks(&self) -> &[Region] {
        &self.blocks[..self.len]
    }

    /// Iterate over the blocks in address order.
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.blocks().iter()
    }

    /// Remove every block.
    pub fn clear(&mut self) {
        self.blocks = [Region::EMPTY; MEMREGION_MAX_BLOCKS];
        self.len = 0;
    }

    /// Add the address range `[start, end)` to the set.
    ///
    /// Parts of existing blocks overlapped by the new range are trimmed off,
    /// then the range is inserted as a block of its own. A range already
    /// covered by one block is a no-op.
    ///
    /// # Errors
    /// - `Misaligned` / `Inverted` for bad bounds
    /// - `CapacityExceeded` if the set has no room for the new block
    pub fn add_range(&mut self, start: usize, end: usize) -> Result<(), RegionError> {
        let range = Region::new(start, end)?;
        if range.is_empty() || self.iter().any(|b| b.covers(&range)) {
            return Ok(());
        }

        let mut next = *self;
        next.cut(&range)?;
        next.insert(range)?;
        *self = next;
        Ok(())
    }

    /// Delete the address range `[start, end)` from the set.
    ///
    /// Blocks fully covered are removed, partially covered blocks are shrunk
    /// and a block strictly containing the range is split in two.
    ///
    /// # Errors
    /// - `Misaligned` / `Inverted` for bad bounds
    /// - `CapacityExceeded` if a split would need more blocks than the cap
    pub fn delete_range(&mut self, start: usize, end: usize) -> Result<(), RegionError> {
        let range = Region::new(start, end)?;
        if range.is_empty() {
            return Ok(());
        }

        let mut next = *self;
        next.cut(&range)?;
        *self = next;
        Ok(())
    }

    /// Fill every block with a 32-bit pattern.
    ///
    /// # Safety
    /// Every block must describe memory that is valid for writes and not in
    /// use by anything else (typically the memory of a stopped applet or
    /// RAM being cleared before boot). Never call this on ranges supplied by
    /// an applet.
    pub unsafe fn fill(&self, value: u32) {
        for block in self.blocks() {
            let mut addr = block.start;
            while addr < block.end {
                // SAFETY: caller guarantees the block is writable; blocks are
                // granule aligned so every word is in bounds
                unsafe {
                    ptr::write_volatile(addr as *mut u32, value);
                }
                addr += core::mem::size_of::<u32>();
            }
        }
        compiler_fence(Ordering::SeqCst);
    }

    /// Check if `[addr, addr + len)` lies entirely within a single block.
    ///
    /// Ranges spanning two blocks are rejected even if the blocks are
    /// adjacent.
    pub fn contains(&self, addr: usize, len: usize) -> bool {
        if len == 0 {
            return true;
        }
        self.iter().any(|b| b.contains(addr, len))
    }

    /// Remove `range` from every block it intersects.
    fn cut(&mut self, range: &Region) -> Result<(), RegionError> {
        let mut out = Self::new();
        for block in self.blocks() {
            if !block.overlaps(range) {
                out.push(*block)?;
                continue;
            }
            if block.start < range.start {
                out.push(Region {
                    start: block.start,
                    end: range.start,
                })?;
            }
            if range.end < block.end {
                out.push(Region {
                    start: range.end,
                    end: block.end,
                })?;
            }
        }
        *self = out;
        Ok(())
    }

    /// Insert a block that overlaps nothing, keeping start-address order.
    fn insert(&mut self, block: Region) -> Result<(), RegionError> {
        if self.len == MEMREGION_MAX_BLOCKS {
            return Err(RegionError::CapacityExceeded);
        }
        let pos = self
            .blocks()
            .iter()
            .position(|b| b.start > block.start)
            .unwrap_or(self.len);
        self.blocks.copy_within(pos..self.len, pos + 1);
        self.blocks[pos] = block;
        self.len += 1;
        Ok(())
    }

    /// Append a block known to sort after every existing block.
    fn push(&mut self, block: Region) -> Result<(), RegionError> {
        if self.len == MEMREGION_MAX_BLOCKS {
            return Err(RegionError::CapacityExceeded);
        }
        self.blocks[self.len] = block;
        self.len += 1;
        Ok(())
    }
}

impl Default for RegionSet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RegionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.blocks()).finish()
    }
}
