//! Segment descriptions.
//!
//! A [`ProgramHeaderEntry`] is what the file says; a [`SegmentPlan`] is the
//! page-aligned mapping derived from it; a [`MappedSegment`] is what was
//! actually committed into the address space.

use std::fmt;
use std::ops::Range;

use object::elf;

use crate::error::{LoadError, Result};
use crate::utils::{align_up, page_down, page_offset, PAGE_SIZE};

/// One decoded program header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeaderEntry {
    /// Position in the program header table.
    pub index: usize,
    pub p_type: u32,
    pub flags: SegmentFlags,
    pub offset: u32,
    pub vaddr: u32,
    /// Physical address, unused on this host.
    pub paddr: u32,
    pub filesz: u32,
    pub memsz: u32,
    pub align: u32,
}

impl ProgramHeaderEntry {
    pub fn is_load(&self) -> bool {
        self.p_type == elf::PT_LOAD
    }

    /// Whether `addr` lies inside this segment's in-memory footprint.
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.vaddr && u64::from(addr) < u64::from(self.vaddr) + u64::from(self.memsz)
    }
}

/// The `p_flags` permission bits of a segment.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentFlags(u32);

impl SegmentFlags {
    pub const R: SegmentFlags = SegmentFlags(elf::PF_R);
    pub const W: SegmentFlags = SegmentFlags(elf::PF_W);
    pub const X: SegmentFlags = SegmentFlags(elf::PF_X);

    pub fn from_bits(bits: u32) -> Self {
        SegmentFlags(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn readable(self) -> bool {
        self.0 & elf::PF_R != 0
    }

    pub fn writable(self) -> bool {
        self.0 & elf::PF_W != 0
    }

    pub fn executable(self) -> bool {
        self.0 & elf::PF_X != 0
    }
}

impl std::ops::BitOr for SegmentFlags {
    type Output = SegmentFlags;

    fn bitor(self, rhs: Self) -> Self {
        SegmentFlags(self.0 | rhs.0)
    }
}

/// Renders the `Flg` column of a segment table, e.g. `R X`.
impl fmt::Display for SegmentFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bit = |set, c| if set { c } else { ' ' };
        write!(
            f,
            "{}{}{}",
            bit(self.readable(), 'R'),
            bit(self.writable(), 'W'),
            bit(self.executable(), 'X')
        )
    }
}

impl fmt::Debug for SegmentFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SegmentFlags({self})")
    }
}

/// Host memory protection for a mapped segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Protection {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
}

impl Protection {
    pub const READ_EXEC: Protection = Protection {
        read: true,
        write: false,
        exec: true,
    };
    pub const READ_WRITE: Protection = Protection {
        read: true,
        write: true,
        exec: false,
    };

    /// Each flag maps to its own permission; nothing is implied.
    pub fn from_flags(flags: SegmentFlags) -> Self {
        Protection {
            read: flags.readable(),
            write: flags.writable(),
            exec: flags.executable(),
        }
    }

    /// The `PROT_*` bits for `mmap`/`mprotect`.
    pub fn to_prot(self) -> libc::c_int {
        let mut prot = libc::PROT_NONE;
        if self.read {
            prot |= libc::PROT_READ;
        }
        if self.write {
            prot |= libc::PROT_WRITE;
        }
        if self.exec {
            prot |= libc::PROT_EXEC;
        }
        prot
    }
}

/// Page-aligned mapping parameters for one `LOAD` segment.
///
/// A pure function of its [`ProgramHeaderEntry`]: building the plan twice
/// from the same entry gives the same plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPlan {
    pub entry: ProgramHeaderEntry,
    /// Virtual address rounded down to its page.
    pub base: u32,
    /// File offset rounded down to its page.
    pub file_offset: u32,
    /// Low bits dropped from both the address and the offset.
    pub padding: u32,
    /// `memsz + padding`, the bytes that must be addressable from `base`.
    pub size: u32,
    pub protection: Protection,
}

impl SegmentPlan {
    pub fn new(entry: &ProgramHeaderEntry) -> Result<Self> {
        let index = entry.index;
        if entry.memsz < entry.filesz {
            return Err(LoadError::segment(
                index,
                format!(
                    "memory size 0x{:x} is smaller than file size 0x{:x}",
                    entry.memsz, entry.filesz
                ),
            ));
        }
        let padding = page_offset(entry.vaddr);
        if padding != page_offset(entry.offset) {
            return Err(LoadError::segment(
                index,
                format!(
                    "virtual address 0x{:08x} and file offset 0x{:x} are not congruent modulo the page size",
                    entry.vaddr, entry.offset
                ),
            ));
        }
        // The last page must end inside the 32-bit space too.
        let end = entry.vaddr.checked_add(entry.memsz);
        if end.and_then(|end| end.checked_add(PAGE_SIZE - 1)).is_none() {
            return Err(LoadError::segment(
                index,
                "segment extends past the end of the address space",
            ));
        }
        if entry.offset.checked_add(entry.filesz).is_none() {
            return Err(LoadError::segment(index, "file range overflows"));
        }

        Ok(SegmentPlan {
            entry: *entry,
            base: page_down(entry.vaddr),
            file_offset: page_down(entry.offset),
            padding,
            size: entry.memsz + padding,
            protection: Protection::from_flags(entry.flags),
        })
    }

    /// Length of the mapping, whole pages.
    pub fn map_len(&self) -> usize {
        align_up(self.size as usize, PAGE_SIZE as usize)
    }

    /// Bytes from `base` backed by the file; the rest of the mapping is
    /// anonymous. Whole pages, never past [`Self::map_len`].
    pub fn file_backed_len(&self) -> usize {
        if self.entry.filesz == 0 {
            return 0;
        }
        let extent = (self.padding + self.entry.filesz) as usize;
        align_up(extent, PAGE_SIZE as usize).min(self.map_len())
    }

    /// Page range `[base, base + map_len)`, widened to `u64` so the end of the
    /// 32-bit space does not wrap.
    pub fn pages(&self) -> Range<u64> {
        let start = u64::from(self.base);
        start..start + self.map_len() as u64
    }

    /// The uninitialized tail, as absolute addresses.
    pub fn zero_fill(&self) -> Option<Range<u32>> {
        let e = &self.entry;
        (e.memsz > e.filesz).then(|| e.vaddr + e.filesz..e.vaddr + e.memsz)
    }
}

/// A segment committed into the address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedSegment {
    /// Index of the program header this came from.
    pub index: usize,
    pub base: usize,
    pub len: usize,
    pub protection: Protection,
    /// Range that reads as zero rather than file contents.
    pub zero_fill: Option<Range<usize>>,
}

impl MappedSegment {
    pub fn from_plan(plan: &SegmentPlan) -> Self {
        MappedSegment {
            index: plan.entry.index,
            base: plan.base as usize,
            len: plan.map_len(),
            protection: plan.protection,
            zero_fill: plan
                .zero_fill()
                .map(|r| r.start as usize..r.end as usize),
        }
    }

    pub fn range(&self) -> Range<usize> {
        self.base..self.base + self.len
    }
}
