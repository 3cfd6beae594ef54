//! Address Arithmetic
//!
//! Alignment helpers for the memory protection unit granule and
//! overflow-checked range arithmetic.
//!
//! # Security Properties
//! - Range ends are computed with checked arithmetic, never wrapping
//! - Alignment is validated before any region is constructed

/// Minimum protection granule (4 bytes).
pub const GRANULE: usize = 4;
/// Granule mask
pub const GRANULE_MASK: usize = GRANULE - 1;

/// Check if an address is aligned to the protection granule.
#[inline]
pub const fn is_aligned(addr: usize) -> bool {
    addr & GRANULE_MASK == 0
}

/// Align an address down to the protection granule.
#[inline]
pub const fn align_down(addr: usize) -> usize {
    addr & !GRANULE_MASK
}

/// Align an address up to the protection granule.
///
/// Returns `None` if the result does not fit in the address space.
#[inline]
pub const fn align_up(addr: usize) -> Option<usize> {
    match addr.checked_add(GRANULE_MASK) {
        Some(v) => Some(v & !GRANULE_MASK),
        None => None,
    }
}

/// Exclusive end address of `[addr, addr + len)`.
///
/// Returns `None` when the range wraps around the end of the address space.
#[inline]
pub const fn range_end(addr: usize, len: usize) -> Option<usize> {
    addr.checked_add(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment() {
        assert!(is_aligned(0x2000_0000));
        assert!(!is_aligned(0x2000_0002));
        assert_eq!(align_down(0x1003), 0x1000);
        assert_eq!(align_up(0x1001), Some(0x1004));
        assert_eq!(align_up(usize::MAX), None);
    }

    #[test]
    fn test_range_end_overflow() {
        assert_eq!(range_end(0x1000, 0x10), Some(0x1010));
        assert_eq!(range_end(usize::MAX - 3, 4), None);
        assert_eq!(range_end(usize::MAX, 0), Some(usize::MAX));
    }
}
