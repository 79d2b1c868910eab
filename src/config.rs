//! Configuration module.
//!
//! This module defines the command-line interface (CLI) for the loader using `clap`.
//! Everything after the program path belongs to the loaded program and is
//! passed through untouched, hyphens included.

use clap::Parser;
use std::path::PathBuf;

/// A minimal loader for static 32-bit ELF executables.
///
/// Maps the program's LOAD segments into this process at their link-time
/// addresses and jumps to its entry point. There is no isolation: the program
/// runs with the loader's privileges, in the loader's address space.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Print a table of the LOAD segments as they are mapped
    #[arg(short, long)]
    pub table: bool,

    /// Validate the program and print its segment table without loading it
    #[arg(long)]
    pub inspect: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn", help = "Set the logging level")]
    pub log_level: String,

    /// Static 32-bit ELF executable to run
    pub program: PathBuf,

    /// Arguments for the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}
