//! Entry point for the uload loader.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap`.
//! 2. Map the program file read-only and validate its header.
//! 3. Check the program's machine against the `I386` backend (the only supported architecture).
//! 4. Plan and map every LOAD segment.
//! 5. Release the file and hand control to the program.
//!
//! Error handling is done via `anyhow`.

use anyhow::{Context, Result};
use clap::Parser;
use memmap2::Mmap;
use std::ffi::CString;
use std::fs::File;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use tracing_subscriber::EnvFilter;

use uload::arch::x86::I386;
use uload::arch::Architecture;
use uload::config::Config;
use uload::loader::{LoadPlan, Loader};
use uload::mapper::MmapMapper;
use uload::observer::SegmentTable;
use uload::LoadError;

fn main() -> Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let argv = std::iter::once(config.program.as_os_str().as_bytes().to_vec())
        .chain(config.args.iter().map(|a| a.clone().into_bytes()))
        .map(CString::new)
        .collect::<Result<Vec<_>, _>>()
        .context("program arguments must not contain NUL bytes")?;
    let envp = std::env::vars_os()
        .filter_map(|(k, v)| {
            let mut kv = k.as_bytes().to_vec();
            kv.push(b'=');
            kv.extend_from_slice(v.as_bytes());
            CString::new(kv).ok()
        })
        .collect::<Vec<_>>();

    let arch = I386;
    let path = &config.program;
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.clone(),
        source,
    })?;
    let image = unsafe { Mmap::map(&file) }.map_err(|source| LoadError::Io {
        path: path.clone(),
        source,
    })?;

    let header = uload::elf::parse(&image).with_context(|| format!("cannot load {}", path.display()))?;
    if header.machine() != arch.machine() {
        anyhow::bail!(
            "Unsupported architecture in {}: e_machine {}. Only i386 is supported.",
            path.display(),
            header.machine()
        );
    }
    let plan = LoadPlan::new(&header).with_context(|| format!("cannot load {}", path.display()))?;

    let mut stdout = std::io::stdout().lock();
    if config.inspect {
        let mut table = SegmentTable::new(&mut stdout);
        for seg in plan.segments() {
            table.row(&seg.entry, seg.protection);
        }
        writeln!(stdout, "Entry point: 0x{:08x}", plan.entry_address())?;
        return Ok(());
    }

    let mut loader = Loader::new(MmapMapper::new(&file));
    let loaded = if config.table {
        loader.load(&plan, SegmentTable::new(&mut stdout))
    } else {
        loader.load(&plan, ())
    }
    .with_context(|| format!("cannot load {}", path.display()))?;
    stdout.flush()?;
    drop(stdout);

    // The segments hold their own references to the file.
    drop(loader);
    drop(image);
    drop(file);

    let err = match unsafe { arch.transfer(&argv, &envp, loaded.entry(), loaded.aux()) } {
        Ok(never) => match never {},
        Err(err) => err,
    };
    Err(err).context("cannot start program")
}
