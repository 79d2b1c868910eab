//! Core loader logic.
//!
//! Loading happens in two steps:
//! 1. Planning: every program header is visited, each `LOAD` entry is turned
//!    into a [`SegmentPlan`] and the whole set is checked, before anything is
//!    mapped.
//! 2. Mapping: plans are committed in program header order through a
//!    [`Mapper`]. The result is a [`LoadedImage`], the only thing control can
//!    be transferred into.

use object::elf;

use crate::elf::ElfHeader;
use crate::error::{LoadError, Result};
use crate::mapper::Mapper;
use crate::observer::LoadObserver;
use crate::segment::{MappedSegment, ProgramHeaderEntry, SegmentPlan};

/// Entry address of a fully mapped image. Only a [`LoadedImage`] hands these out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint(u32);

impl EntryPoint {
    pub fn address(self) -> u32 {
        self.0
    }
}

/// What the startup code learns about its own image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxInfo {
    /// Address of the program header table in the loaded image, if mapped.
    pub phdr: Option<u32>,
    pub phent: u16,
    pub phnum: u16,
    pub entry: u32,
}

/// Validated set of segments to map.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    entry: u32,
    segments: Vec<SegmentPlan>,
    aux: AuxInfo,
}

impl LoadPlan {
    /// Plans every `LOAD` segment of `header`.
    pub fn new(header: &ElfHeader<'_>) -> Result<Self> {
        let mut segments = Vec::new();
        let mut phdr_segment = None;

        for entry in header.program_headers() {
            match entry.p_type {
                elf::PT_LOAD if entry.memsz == 0 && entry.filesz == 0 => {
                    tracing::debug!("skipping empty LOAD segment #{}", entry.index);
                }
                elf::PT_LOAD => {
                    let plan = SegmentPlan::new(&entry)?;
                    check_file_range(&entry, header.image_len())?;
                    tracing::debug!(
                        "segment #{}: 0x{:08x}+0x{:x} from offset 0x{:x}, {:?}",
                        entry.index,
                        plan.base,
                        plan.map_len(),
                        plan.file_offset,
                        plan.protection
                    );
                    segments.push(plan);
                }
                elf::PT_PHDR => phdr_segment = Some(entry),
                other => tracing::trace!("ignoring program header #{} (type 0x{:x})", entry.index, other),
            }
        }

        check_overlaps(&segments)?;

        let entry = header.entry();
        let target = segments
            .iter()
            .find(|s| s.entry.contains(entry))
            .ok_or_else(|| {
                LoadError::malformed(format!(
                    "entry point 0x{entry:08x} is outside every LOAD segment"
                ))
            })?;
        if !target.protection.exec {
            tracing::warn!(
                "entry point 0x{:08x} lies in non-executable segment #{}",
                entry,
                target.entry.index
            );
        }

        let aux = AuxInfo {
            phdr: phdr_address(header, phdr_segment.as_ref(), &segments),
            phent: header.phentsize(),
            phnum: u16::try_from(header.phnum()).unwrap_or(u16::MAX),
            entry,
        };

        Ok(LoadPlan {
            entry,
            segments,
            aux,
        })
    }

    pub fn segments(&self) -> &[SegmentPlan] {
        &self.segments
    }

    pub fn entry_address(&self) -> u32 {
        self.entry
    }

    pub fn aux(&self) -> &AuxInfo {
        &self.aux
    }
}

fn check_file_range(entry: &ProgramHeaderEntry, image_len: usize) -> Result<()> {
    let end = u64::from(entry.offset) + u64::from(entry.filesz);
    if entry.filesz > 0 && end > image_len as u64 {
        return Err(LoadError::segment(
            entry.index,
            format!("file range ends at 0x{end:x}, past the end of the image (0x{image_len:x})"),
        ));
    }
    Ok(())
}

fn check_overlaps(segments: &[SegmentPlan]) -> Result<()> {
    for (i, a) in segments.iter().enumerate() {
        for b in &segments[i + 1..] {
            let (pa, pb) = (a.pages(), b.pages());
            if pa.start < pb.end && pb.start < pa.end {
                return Err(LoadError::segment(
                    b.entry.index,
                    format!("pages overlap LOAD segment #{}", a.entry.index),
                ));
            }
        }
    }
    Ok(())
}

/// Where the program header table sits once the image is mapped: either
/// `PT_PHDR` says so, or it is inside the file range of some `LOAD` segment.
fn phdr_address(
    header: &ElfHeader<'_>,
    phdr_segment: Option<&ProgramHeaderEntry>,
    segments: &[SegmentPlan],
) -> Option<u32> {
    if let Some(phdr) = phdr_segment {
        return Some(phdr.vaddr);
    }
    let phoff = header.phoff();
    let table_len = header.phnum() as u32 * u32::from(header.phentsize());
    segments.iter().find_map(|s| {
        let e = &s.entry;
        let inside = phoff >= e.offset
            && u64::from(phoff) + u64::from(table_len) <= u64::from(e.offset) + u64::from(e.filesz);
        inside.then(|| e.vaddr + (phoff - e.offset))
    })
}

/// An image whose every `LOAD` segment is committed.
#[derive(Debug)]
pub struct LoadedImage {
    entry: EntryPoint,
    segments: Vec<MappedSegment>,
    aux: AuxInfo,
}

impl LoadedImage {
    pub fn entry(&self) -> EntryPoint {
        self.entry
    }

    pub fn segments(&self) -> &[MappedSegment] {
        &self.segments
    }

    pub fn aux(&self) -> &AuxInfo {
        &self.aux
    }
}

/// Drives a [`Mapper`] over a [`LoadPlan`].
pub struct Loader<M: Mapper> {
    mapper: M,
}

impl<M: Mapper> Loader<M> {
    pub fn new(mapper: M) -> Self {
        Self { mapper }
    }

    /// Maps every planned segment in order. The first failure aborts the
    /// load; segments already mapped stay in place.
    pub fn load(&mut self, plan: &LoadPlan, mut observer: impl LoadObserver) -> Result<LoadedImage> {
        let mut segments = Vec::with_capacity(plan.segments.len());
        for seg in &plan.segments {
            let mapped = self.mapper.map(seg)?;
            tracing::debug!(
                "mapped segment #{} at 0x{:x}..0x{:x}",
                mapped.index,
                mapped.base,
                mapped.base + mapped.len
            );
            observer.segment_mapped(&seg.entry, &mapped);
            segments.push(mapped);
        }
        let entry = EntryPoint(plan.entry);
        observer.image_loaded(entry);

        Ok(LoadedImage {
            entry,
            segments,
            aux: plan.aux,
        })
    }
}
