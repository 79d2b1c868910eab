//! Utility functions.

/// Page size assumed for every mapping.
pub const PAGE_SIZE: u32 = 0x1000;

/// Rounds an address down to the start of its page.
pub fn page_down(addr: u32) -> u32 {
    addr & !(PAGE_SIZE - 1)
}

/// Offset of an address within its page.
pub fn page_offset(addr: u32) -> u32 {
    addr & (PAGE_SIZE - 1)
}

/// Aligns a length up to the next multiple of `align`.
/// `align` must be a power of two.
pub fn align_up(len: usize, align: usize) -> usize {
    assert!(align.is_power_of_two());
    (len + align - 1) & !(align - 1)
}
