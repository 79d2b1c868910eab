//! Architecture abstraction.
//!
//! This module defines the `Architecture` trait, the one place where the loader
//! hands the processor over to the loaded program. Everything before it is
//! plain data manipulation; everything after it is the program's business.

use std::convert::Infallible;
use std::ffi::CString;

use crate::error::Result;
use crate::loader::{AuxInfo, EntryPoint};

pub mod x86;

/// A target the loader can start programs for.
pub trait Architecture {
    /// The `e_machine` value of programs this backend can run.
    fn machine(&self) -> u16;

    /// Builds the initial process state and jumps to `entry`.
    ///
    /// # Arguments
    /// * `argv` - The program's argument vector; its length is `argc`.
    /// * `envp` - The program's environment, `NAME=value` strings.
    /// * `entry` - Entry address of the mapped image, unrounded.
    /// * `aux` - Facts about the image for the auxiliary vector.
    ///
    /// Only returns on failure.
    ///
    /// # Safety
    /// Every `LOAD` segment of the image `entry` belongs to must be mapped.
    /// The program runs with the loader's privileges inside its address space,
    /// and nothing of the loader's state survives the jump.
    unsafe fn transfer(
        &self,
        argv: &[CString],
        envp: &[CString],
        entry: EntryPoint,
        aux: &AuxInfo,
    ) -> Result<Infallible>;
}
