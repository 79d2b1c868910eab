//! Helpers shared by the integration tests: an ELF32 image builder and
//! recording stand-ins for the mapper, observer and architecture.
#![allow(dead_code)]

use std::convert::Infallible;
use std::ffi::CString;
use std::io::{self, Write};

use object::elf::{self, FileHeader32, ProgramHeader32};
use object::endian::{U16, U32};
use object::pod::bytes_of;
use object::Endianness;
use tempfile::NamedTempFile;

use uload::arch::Architecture;
use uload::loader::{AuxInfo, EntryPoint};
use uload::mapper::Mapper;
use uload::observer::LoadObserver;
use uload::segment::{MappedSegment, ProgramHeaderEntry, SegmentPlan};
use uload::LoadError;

pub const EHDR_SIZE: u32 = 52;
pub const PHDR_SIZE: u32 = 32;

#[cfg(target_endian = "little")]
const NATIVE: Endianness = Endianness::Little;
#[cfg(target_endian = "big")]
const NATIVE: Endianness = Endianness::Big;

fn u16(v: u16) -> U16<Endianness> {
    U16::new(NATIVE, v)
}
fn u32(v: u32) -> U32<Endianness> {
    U32::new(NATIVE, v)
}

/// One program header to emit, with the file bytes it covers.
#[derive(Clone)]
pub struct Phdr {
    pub p_type: u32,
    pub flags: u32,
    pub offset: u32,
    pub vaddr: u32,
    pub data: Vec<u8>,
    /// Overrides `data.len()` as `p_filesz` when set.
    pub filesz: Option<u32>,
    pub memsz: u32,
}

/// Builds executable ELF32 images in memory.
pub struct ImageBuilder {
    entry: u32,
    machine: u16,
    e_type: u16,
    phdrs: Vec<Phdr>,
    raw: Vec<(u32, Vec<u8>)>,
}

pub fn image(entry: u32) -> ImageBuilder {
    ImageBuilder {
        entry,
        machine: elf::EM_386,
        e_type: elf::ET_EXEC,
        phdrs: Vec::new(),
        raw: Vec::new(),
    }
}

impl ImageBuilder {
    pub fn e_type(mut self, e_type: u16) -> Self {
        self.e_type = e_type;
        self
    }

    /// Adds a `LOAD` header whose file bytes are `data`, placed at `offset`.
    pub fn load(self, vaddr: u32, offset: u32, flags: u32, data: &[u8], memsz: u32) -> Self {
        self.phdr(Phdr {
            p_type: elf::PT_LOAD,
            flags,
            offset,
            vaddr,
            data: data.to_vec(),
            filesz: None,
            memsz,
        })
    }

    pub fn phdr(mut self, phdr: Phdr) -> Self {
        self.phdrs.push(phdr);
        self
    }

    /// Writes arbitrary bytes into the file, e.g. content past a segment's
    /// file size.
    pub fn bytes_at(mut self, offset: u32, bytes: &[u8]) -> Self {
        self.raw.push((offset, bytes.to_vec()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut buffer = Vec::new();

        let file_header = FileHeader32::<Endianness> {
            e_ident: elf::Ident {
                magic: elf::ELFMAG,
                class: elf::ELFCLASS32,
                data: if cfg!(target_endian = "little") {
                    elf::ELFDATA2LSB
                } else {
                    elf::ELFDATA2MSB
                },
                version: elf::EV_CURRENT,
                os_abi: elf::ELFOSABI_SYSV,
                abi_version: 0,
                padding: [0; 7],
            },
            e_type: u16(self.e_type),
            e_machine: u16(self.machine),
            e_version: u32(elf::EV_CURRENT as u32),
            e_entry: u32(self.entry),
            e_phoff: u32(if self.phdrs.is_empty() { 0 } else { EHDR_SIZE }),
            e_shoff: u32(0),
            e_flags: u32(0),
            e_ehsize: u16(EHDR_SIZE as u16),
            e_phentsize: u16(PHDR_SIZE as u16),
            e_phnum: u16(self.phdrs.len() as u16),
            e_shentsize: u16(0),
            e_shnum: u16(0),
            e_shstrndx: u16(0),
        };
        buffer.extend_from_slice(bytes_of(&file_header));

        for p in &self.phdrs {
            let prog_header = ProgramHeader32::<Endianness> {
                p_type: u32(p.p_type),
                p_offset: u32(p.offset),
                p_vaddr: u32(p.vaddr),
                p_paddr: u32(p.vaddr),
                p_filesz: u32(p.filesz.unwrap_or(p.data.len() as u32)),
                p_memsz: u32(p.memsz),
                p_flags: u32(p.flags),
                p_align: u32(0x1000),
            };
            buffer.extend_from_slice(bytes_of(&prog_header));
        }

        // A segment at offset 0 covers the headers; its data only fills in
        // what follows them.
        let headers_len = buffer.len();
        for p in &self.phdrs {
            let start = p.offset as usize;
            let end = start + p.data.len();
            if buffer.len() < end {
                buffer.resize(end, 0);
            }
            let skip = headers_len.saturating_sub(start).min(p.data.len());
            buffer[start + skip..end].copy_from_slice(&p.data[skip..]);
        }
        for (offset, bytes) in &self.raw {
            let start = *offset as usize;
            let end = start + bytes.len();
            if buffer.len() < end {
                buffer.resize(end, 0);
            }
            buffer[start..end].copy_from_slice(bytes);
        }
        buffer
    }

    /// Writes the image to a file in the target directory, where mapping it
    /// executable is allowed.
    pub fn write(&self) -> NamedTempFile {
        let mut file = NamedTempFile::new_in(env!("CARGO_TARGET_TMPDIR")).unwrap();
        file.write_all(&self.build()).unwrap();
        file.flush().unwrap();
        file
    }
}

/// Records every plan it is asked to map; optionally fails on one index.
#[derive(Default)]
pub struct RecordingMapper {
    pub plans: Vec<SegmentPlan>,
    pub fail_at: Option<usize>,
}

impl Mapper for RecordingMapper {
    fn map(&mut self, plan: &SegmentPlan) -> Result<MappedSegment, LoadError> {
        self.plans.push(plan.clone());
        if self.fail_at == Some(plan.entry.index) {
            return Err(LoadError::MappingFailure {
                index: plan.entry.index,
                address: plan.base,
                source: io::Error::from(io::ErrorKind::OutOfMemory),
            });
        }
        Ok(MappedSegment::from_plan(plan))
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub mapped: Vec<(ProgramHeaderEntry, MappedSegment)>,
    pub loaded: Option<EntryPoint>,
}

impl LoadObserver for RecordingObserver {
    fn segment_mapped(&mut self, entry: &ProgramHeaderEntry, segment: &MappedSegment) {
        assert!(self.loaded.is_none(), "segment reported after the image was loaded");
        self.mapped.push((*entry, segment.clone()));
    }

    fn image_loaded(&mut self, entry: EntryPoint) {
        self.loaded = Some(entry);
    }
}

/// Remembers what it was asked to start instead of jumping.
#[derive(Default)]
pub struct RecordingArch {
    pub calls: std::cell::RefCell<Vec<(Vec<CString>, EntryPoint, AuxInfo)>>,
}

impl Architecture for RecordingArch {
    fn machine(&self) -> u16 {
        elf::EM_386
    }

    unsafe fn transfer(
        &self,
        argv: &[CString],
        _envp: &[CString],
        entry: EntryPoint,
        aux: &AuxInfo,
    ) -> Result<Infallible, LoadError> {
        self.calls.borrow_mut().push((argv.to_vec(), entry, *aux));
        Err(LoadError::UnsupportedHost("recorded"))
    }
}
