//! Initial process stack for 32-bit programs.
//!
//! Layout, from the stack pointer upwards:
//!
//! ```text
//! argc
//! argv[0] .. argv[argc - 1], NULL
//! envp[0] .. envp[n - 1], NULL
//! auxv pairs .., AT_RANDOM, AT_NULL
//! (padding)
//! 16 random bytes
//! argument and environment strings
//! ```

use std::ffi::CString;

use crate::error::{LoadError, Result};
use crate::loader::AuxInfo;
use crate::utils::PAGE_SIZE;

// Auxiliary vector keys, <elf.h>.
pub const AT_NULL: u32 = 0;
pub const AT_PHDR: u32 = 3;
pub const AT_PHENT: u32 = 4;
pub const AT_PHNUM: u32 = 5;
pub const AT_PAGESZ: u32 = 6;
pub const AT_ENTRY: u32 = 9;
pub const AT_UID: u32 = 11;
pub const AT_EUID: u32 = 12;
pub const AT_GID: u32 = 13;
pub const AT_EGID: u32 = 14;
pub const AT_SECURE: u32 = 23;
pub const AT_RANDOM: u32 = 25;

const WORD: u32 = 4;
const STACK_ALIGN: u32 = 16;

/// Auxiliary vector entries describing the loaded image itself.
pub fn image_auxv(aux: &AuxInfo) -> Vec<(u32, u32)> {
    let mut auxv = Vec::with_capacity(5);
    if let Some(phdr) = aux.phdr {
        auxv.push((AT_PHDR, phdr));
    }
    auxv.push((AT_PHENT, u32::from(aux.phent)));
    auxv.push((AT_PHNUM, u32::from(aux.phnum)));
    auxv.push((AT_PAGESZ, PAGE_SIZE));
    auxv.push((AT_ENTRY, aux.entry));
    auxv
}

/// Bytes to place so that they end at `top`, and the resulting stack pointer.
#[derive(Debug)]
pub struct InitialStack {
    pub sp: u32,
    pub bytes: Vec<u8>,
}

impl InitialStack {
    /// Lays out the stack below `top`. `AT_RANDOM` and `AT_NULL` are appended
    /// to `auxv`.
    pub fn build(
        top: u32,
        argv: &[CString],
        envp: &[CString],
        auxv: &[(u32, u32)],
        random: [u8; 16],
    ) -> Result<Self> {
        let too_big = || LoadError::StartupStack("arguments and environment do not fit".into());

        let strings: Vec<&[u8]> = argv
            .iter()
            .chain(envp)
            .map(|s| s.as_bytes_with_nul())
            .collect();
        let strings_len: usize = strings.iter().map(|s| s.len()).sum();
        let strings_at = u32::try_from(strings_len)
            .ok()
            .and_then(|len| top.checked_sub(len))
            .ok_or_else(too_big)?;
        let random_at = strings_at
            .checked_sub(random.len() as u32)
            .ok_or_else(too_big)?
            & !(STACK_ALIGN - 1);

        let word_count = 1 + (argv.len() + 1) + (envp.len() + 1) + 2 * (auxv.len() + 2);
        let sp = u32::try_from(word_count * WORD as usize)
            .ok()
            .and_then(|len| random_at.checked_sub(len))
            .ok_or_else(too_big)?
            & !(STACK_ALIGN - 1);

        let mut words = Vec::with_capacity(word_count);
        words.push(argv.len() as u32);
        let mut cursor = strings_at;
        let mut pointers = strings.iter().map(|s| {
            let at = cursor;
            cursor += s.len() as u32;
            at
        });
        words.extend(pointers.by_ref().take(argv.len()));
        words.push(0);
        words.extend(pointers);
        words.push(0);
        for &(key, value) in auxv {
            words.extend([key, value]);
        }
        words.extend([AT_RANDOM, random_at, AT_NULL, 0]);
        debug_assert_eq!(words.len(), word_count);

        let mut bytes = vec![0u8; (top - sp) as usize];
        for (i, w) in words.iter().enumerate() {
            let at = i * WORD as usize;
            bytes[at..at + WORD as usize].copy_from_slice(&w.to_ne_bytes());
        }
        let at = (random_at - sp) as usize;
        bytes[at..at + random.len()].copy_from_slice(&random);
        let mut at = (strings_at - sp) as usize;
        for s in &strings {
            bytes[at..at + s.len()].copy_from_slice(s);
            at += s.len();
        }

        Ok(InitialStack { sp, bytes })
    }
}
