//! Load progress observers.
//!
//! The loader reports each committed segment to a [`LoadObserver`]; printing
//! a segment table is one such observer, doing nothing is another (`()`).

use std::io::Write;

use crate::loader::EntryPoint;
use crate::mapper::MAP_FLAGS;
use crate::segment::{MappedSegment, ProgramHeaderEntry, Protection};

pub trait LoadObserver {
    fn segment_mapped(&mut self, entry: &ProgramHeaderEntry, segment: &MappedSegment);

    /// Called once every segment is mapped, before control is handed over.
    fn image_loaded(&mut self, _entry: EntryPoint) {}
}

impl LoadObserver for () {
    fn segment_mapped(&mut self, _entry: &ProgramHeaderEntry, _segment: &MappedSegment) {}
}

impl<O: LoadObserver + ?Sized> LoadObserver for &mut O {
    fn segment_mapped(&mut self, entry: &ProgramHeaderEntry, segment: &MappedSegment) {
        (**self).segment_mapped(entry, segment)
    }

    fn image_loaded(&mut self, entry: EntryPoint) {
        (**self).image_loaded(entry)
    }
}

/// Prints a readelf-style row per `LOAD` segment, with the column header
/// emitted before the first row, and the entry point once loading is done.
pub struct SegmentTable<W: Write> {
    out: W,
    header_printed: bool,
}

impl<W: Write> SegmentTable<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            header_printed: false,
        }
    }

    pub fn row(&mut self, entry: &ProgramHeaderEntry, protection: Protection) {
        if let Err(e) = self.write_row(entry, protection) {
            tracing::warn!("failed to print segment table: {}", e);
        }
    }

    fn write_row(&mut self, entry: &ProgramHeaderEntry, protection: Protection) -> std::io::Result<()> {
        if !self.header_printed {
            writeln!(
                self.out,
                "Type   Offset   VirtAddr   PhysAddr   FileSiz   MemSiz   Flg   Align"
            )?;
            self.header_printed = true;
        }
        writeln!(
            self.out,
            " LOAD  0x{:06x}  0x{:08x}  0x{:08x}  0x{:05x}   0x{:05x}   {}  {}",
            entry.offset, entry.vaddr, entry.paddr, entry.filesz, entry.memsz, entry.flags, entry.align
        )?;
        writeln!(self.out, "----Protection flags: {}", protection.to_prot())?;
        writeln!(self.out, "----Mapping flags: {}", MAP_FLAGS)?;
        writeln!(self.out)
    }

    /// Announces the address control is about to be transferred to.
    pub fn entry(&mut self, address: u32) {
        if let Err(e) = writeln!(self.out, "\nStarting program at entry point: 0x{address:08x}") {
            tracing::warn!("failed to print segment table: {}", e);
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> LoadObserver for SegmentTable<W> {
    fn segment_mapped(&mut self, entry: &ProgramHeaderEntry, segment: &MappedSegment) {
        self.row(entry, segment.protection)
    }

    fn image_loaded(&mut self, entry: EntryPoint) {
        self.entry(entry.address())
    }
}
