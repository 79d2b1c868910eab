//! Committing segment plans into the address space.
//!
//! [`Mapper`] is the seam between the loading logic and the kernel: the loader
//! decides what goes where, a mapper makes it so. [`MmapMapper`] is the real
//! implementation on top of `mmap(2)`.

use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::ptr;

use crate::error::{LoadError, Result};
use crate::segment::{MappedSegment, SegmentPlan};

/// `mmap` flags for every segment mapping; anonymous pages add `MAP_ANONYMOUS`.
pub const MAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_FIXED_NOREPLACE;

/// Commits one segment at its planned address.
pub trait Mapper {
    fn map(&mut self, plan: &SegmentPlan) -> Result<MappedSegment>;
}

impl<M: Mapper + ?Sized> Mapper for &mut M {
    fn map(&mut self, plan: &SegmentPlan) -> Result<MappedSegment> {
        (**self).map(plan)
    }
}

/// Maps segments from an open file with fixed placement.
pub struct MmapMapper<'f> {
    file: &'f File,
}

impl<'f> MmapMapper<'f> {
    pub fn new(file: &'f File) -> Self {
        Self { file }
    }
}

impl Mapper for MmapMapper<'_> {
    fn map(&mut self, plan: &SegmentPlan) -> Result<MappedSegment> {
        let fail = |source: io::Error| LoadError::MappingFailure {
            index: plan.entry.index,
            address: plan.base,
            source,
        };

        let base = plan.base as usize as *mut libc::c_void;
        let map_len = plan.map_len();
        let file_len = plan.file_backed_len();
        // Writable until the tail is zeroed, then switched to the final protection.
        let staging = libc::PROT_READ | libc::PROT_WRITE;

        if file_len > 0 {
            unsafe {
                map_fixed(
                    base,
                    file_len,
                    staging,
                    MAP_FLAGS,
                    self.file.as_raw_fd(),
                    plan.file_offset as libc::off_t,
                )
            }
            .map_err(fail)?;
        }
        if map_len > file_len {
            unsafe {
                map_fixed(
                    base.cast::<u8>().add(file_len).cast(),
                    map_len - file_len,
                    staging,
                    MAP_FLAGS | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            }
            .map_err(fail)?;
        }

        // Anonymous pages are already zero; only the page shared with file
        // data can hold stale bytes.
        if let Some(zero) = plan.zero_fill() {
            let start = zero.start as usize;
            let end = (zero.end as usize).min(plan.base as usize + file_len);
            if end > start {
                tracing::trace!("zeroing 0x{:x}..0x{:x}", start, end);
                unsafe { ptr::write_bytes(start as *mut u8, 0, end - start) };
            }
        }

        let prot = plan.protection.to_prot();
        if prot != staging && unsafe { libc::mprotect(base, map_len, prot) } != 0 {
            return Err(fail(io::Error::last_os_error()));
        }

        Ok(MappedSegment::from_plan(plan))
    }
}

/// `mmap` at exactly `addr`. `flags` carry `MAP_FIXED_NOREPLACE`, so nothing
/// already there is replaced.
unsafe fn map_fixed(
    addr: *mut libc::c_void,
    len: usize,
    prot: libc::c_int,
    flags: libc::c_int,
    fd: RawFd,
    offset: libc::off_t,
) -> io::Result<()> {
    let mapped = libc::mmap(addr, len, prot, flags, fd, offset);
    if mapped == libc::MAP_FAILED {
        let err = io::Error::last_os_error();
        return Err(match err.raw_os_error() {
            Some(libc::EEXIST) => placement_conflict(),
            _ => err,
        });
    }
    // Kernels without MAP_FIXED_NOREPLACE treat the address as a hint.
    if mapped != addr {
        libc::munmap(mapped, len);
        return Err(placement_conflict());
    }
    Ok(())
}

fn placement_conflict() -> io::Error {
    io::Error::new(io::ErrorKind::AddrInUse, "address range already in use")
}
