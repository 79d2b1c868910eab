//! ELF32 header validation and program header traversal.
//!
//! [`parse`] is the only way to obtain an [`ElfHeader`]; everything
//! downstream works from the typed view and never reinterprets raw bytes.

use object::elf::{self, FileHeader32, ProgramHeader32};
use object::read::elf::{FileHeader as _, ProgramHeader as _};
use object::Endianness;

use crate::error::{LoadError, Result};
use crate::segment::{ProgramHeaderEntry, SegmentFlags};

/// Size of the ELF32 file header.
pub const HEADER_SIZE: usize = 52;

const EI_CLASS: usize = 4;

#[cfg(target_endian = "little")]
const NATIVE: Endianness = Endianness::Little;
#[cfg(target_endian = "big")]
const NATIVE: Endianness = Endianness::Big;

/// A validated 32-bit executable header together with its program header
/// table.
#[derive(Debug, Clone, Copy)]
pub struct ElfHeader<'data> {
    raw: &'data FileHeader32<Endianness>,
    endian: Endianness,
    phdrs: &'data [ProgramHeader32<Endianness>],
    image_len: usize,
}

/// Validates `data` as a 32-bit ELF executable for this host's byte order.
///
/// The magic bytes are checked before any other field is looked at.
pub fn parse(data: &[u8]) -> Result<ElfHeader<'_>> {
    if data.len() < elf::ELFMAG.len() || data[..4] != elf::ELFMAG {
        return Err(LoadError::malformed("not an ELF file (bad magic)"));
    }
    if data.len() < HEADER_SIZE {
        return Err(LoadError::malformed(format!(
            "file too short for an ELF32 header ({} bytes)",
            data.len()
        )));
    }
    let class = data[EI_CLASS];
    if class != elf::ELFCLASS32 {
        return Err(LoadError::malformed(format!(
            "unsupported ELF class {class}, expected 32-bit"
        )));
    }

    let raw = FileHeader32::<Endianness>::parse(data)
        .map_err(|e| LoadError::malformed(e.to_string()))?;
    let endian = raw
        .endian()
        .map_err(|e| LoadError::malformed(e.to_string()))?;
    if endian != NATIVE {
        return Err(LoadError::malformed(format!(
            "{endian:?}-endian image cannot run on this host"
        )));
    }
    let e_type = raw.e_type(endian);
    if e_type != elf::ET_EXEC {
        return Err(LoadError::malformed(format!(
            "not an executable (e_type {e_type})"
        )));
    }

    let phdrs = raw
        .program_headers(endian, data)
        .map_err(|e| LoadError::malformed(format!("program header table: {e}")))?;

    Ok(ElfHeader {
        raw,
        endian,
        phdrs,
        image_len: data.len(),
    })
}

impl<'data> ElfHeader<'data> {
    pub fn entry(&self) -> u32 {
        self.raw.e_entry(self.endian)
    }

    pub fn machine(&self) -> u16 {
        self.raw.e_machine(self.endian)
    }

    pub fn phoff(&self) -> u32 {
        self.raw.e_phoff(self.endian)
    }

    pub fn phentsize(&self) -> u16 {
        self.raw.e_phentsize(self.endian)
    }

    /// Number of program headers.
    pub fn phnum(&self) -> usize {
        self.phdrs.len()
    }

    pub fn endian(&self) -> Endianness {
        self.endian
    }

    /// Length of the whole image this header was parsed from.
    pub fn image_len(&self) -> usize {
        self.image_len
    }

    /// Walks the program header table in file order.
    pub fn program_headers(&self) -> ProgramHeaders<'data> {
        ProgramHeaders {
            inner: self.phdrs.iter().enumerate(),
            endian: self.endian,
        }
    }
}

/// Iterator over every program header of an image, unfiltered.
#[derive(Clone)]
pub struct ProgramHeaders<'data> {
    inner: std::iter::Enumerate<std::slice::Iter<'data, ProgramHeader32<Endianness>>>,
    endian: Endianness,
}

impl Iterator for ProgramHeaders<'_> {
    type Item = ProgramHeaderEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let (index, phdr) = self.inner.next()?;
        let e = self.endian;
        Some(ProgramHeaderEntry {
            index,
            p_type: phdr.p_type(e),
            flags: SegmentFlags::from_bits(phdr.p_flags(e)),
            offset: phdr.p_offset(e),
            vaddr: phdr.p_vaddr(e),
            paddr: phdr.p_paddr(e),
            filesz: phdr.p_filesz(e),
            memsz: phdr.p_memsz(e),
            align: phdr.p_align(e),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for ProgramHeaders<'_> {}
