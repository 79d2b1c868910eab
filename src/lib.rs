//! Minimal ELF Loader Library.
//!
//! This library provides the core components for the `uload` loader.
//! It is organized into several modules:
//! - `config`: CLI configuration.
//! - `elf`: ELF32 header validation and program header traversal.
//! - `segment`: Segment descriptions and page-aligned mapping plans.
//! - `mapper`: Committing plans into the address space.
//! - `loader`: Planning and mapping orchestration.
//! - `observer`: Load progress reporting (segment table).
//! - `stack`: Initial process stack layout.
//! - `arch`: Architecture-specific control transfer.

pub mod arch;
pub mod config;
pub mod elf;
pub mod error;
pub mod loader;
pub mod mapper;
pub mod observer;
pub mod segment;
pub mod stack;
pub mod utils;

pub use error::{ErrorKind, LoadError};
