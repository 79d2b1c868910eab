//! 32-bit x86 backend.
//!
//! Starts `EM_386` programs following the i386 System V process entry
//! convention: `esp` points at `argc`, `edx` holds an optional `atexit`
//! handler (none here) and `ebp` is cleared to mark the outermost frame.

use std::convert::Infallible;
use std::ffi::CString;

use memmap2::MmapMut;
use object::elf;

use super::Architecture;
use crate::error::{LoadError, Result};
use crate::loader::{AuxInfo, EntryPoint};
use crate::stack::{self, InitialStack};

const STACK_SIZE: usize = 8 << 20;

const NOT_X86: &str = "32-bit x86 programs can only be started by a 32-bit x86 loader";

/// The i386 backend.
pub struct I386;

impl Architecture for I386 {
    fn machine(&self) -> u16 {
        elf::EM_386
    }

    unsafe fn transfer(
        &self,
        argv: &[CString],
        envp: &[CString],
        entry: EntryPoint,
        aux: &AuxInfo,
    ) -> Result<Infallible> {
        if !cfg!(target_arch = "x86") {
            return Err(LoadError::UnsupportedHost(NOT_X86));
        }

        let mut stack =
            MmapMut::map_anon(STACK_SIZE).map_err(|e| LoadError::StartupStack(e.to_string()))?;
        let top = u32::try_from(stack.as_ptr() as usize + STACK_SIZE)
            .map_err(|_| LoadError::UnsupportedHost("stack is outside the 32-bit address space"))?;

        let mut auxv = stack::image_auxv(aux);
        auxv.extend([
            (stack::AT_UID, libc::getuid()),
            (stack::AT_EUID, libc::geteuid()),
            (stack::AT_GID, libc::getgid()),
            (stack::AT_EGID, libc::getegid()),
            (stack::AT_SECURE, 0),
        ]);
        let initial = InitialStack::build(top, argv, envp, &auxv, random_bytes())?;
        if initial.bytes.len() > STACK_SIZE {
            return Err(LoadError::StartupStack(format!(
                "{} bytes of arguments and environment exceed the {} byte stack",
                initial.bytes.len(),
                STACK_SIZE
            )));
        }
        stack[STACK_SIZE - initial.bytes.len()..].copy_from_slice(&initial.bytes);
        // Owned by the program from here on.
        std::mem::forget(stack);

        tracing::info!(
            "starting program at entry point 0x{:08x} (sp 0x{:08x}, argc {})",
            entry.address(),
            initial.sp,
            argv.len()
        );
        jump(initial.sp, entry.address())
    }
}

fn random_bytes() -> [u8; 16] {
    let mut buf = [0u8; 16];
    let n = unsafe { libc::getrandom(buf.as_mut_ptr().cast(), buf.len(), 0) };
    if n != buf.len() as isize {
        tracing::warn!(
            "getrandom failed ({}), AT_RANDOM will be zero",
            std::io::Error::last_os_error()
        );
    }
    buf
}

#[cfg(target_arch = "x86")]
unsafe fn jump(sp: u32, entry: u32) -> Result<Infallible> {
    core::arch::asm!(
        "mov esp, eax",
        "xor edx, edx",
        "xor ebp, ebp",
        "jmp ecx",
        in("eax") sp,
        in("ecx") entry,
        options(noreturn),
    )
}

#[cfg(not(target_arch = "x86"))]
unsafe fn jump(_sp: u32, _entry: u32) -> Result<Infallible> {
    Err(LoadError::UnsupportedHost(NOT_X86))
}
