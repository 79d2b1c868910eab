//! Loader error types.
//!
//! Every failure is fatal: the loader either maps the whole image and hands
//! control over, or reports one of these and the process exits.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    /// The file header (or the entry point it names) cannot be trusted.
    #[error("malformed ELF image: {0}")]
    MalformedFormat(String),

    /// A `LOAD` program header is structurally inconsistent.
    #[error("malformed LOAD segment #{index}: {reason}")]
    MalformedSegment { index: usize, reason: String },

    /// The kernel refused to commit a segment at its address.
    #[error("failed to map segment #{index} at 0x{address:08x}")]
    MappingFailure {
        index: usize,
        address: u32,
        #[source]
        source: io::Error,
    },

    /// The initial stack for the program could not be set up.
    #[error("failed to set up the initial stack: {0}")]
    StartupStack(String),

    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The trampoline cannot run foreign code on this host.
    #[error("cannot start program on this host: {0}")]
    UnsupportedHost(&'static str),
}

/// Coarse classification of a [`LoadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedFormat,
    MappingFailure,
    IoFailure,
    UnsupportedHost,
}

impl LoadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::MalformedFormat(_) | LoadError::MalformedSegment { .. } => {
                ErrorKind::MalformedFormat
            }
            LoadError::MappingFailure { .. } | LoadError::StartupStack(_) => {
                ErrorKind::MappingFailure
            }
            LoadError::Io { .. } => ErrorKind::IoFailure,
            LoadError::UnsupportedHost(_) => ErrorKind::UnsupportedHost,
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        LoadError::MalformedFormat(reason.into())
    }

    pub(crate) fn segment(index: usize, reason: impl Into<String>) -> Self {
        LoadError::MalformedSegment {
            index,
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = LoadError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_group_variants() {
        let io = LoadError::Io {
            path: "/nonexistent".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert_eq!(io.kind(), ErrorKind::IoFailure);
        assert_eq!(io.to_string(), "failed to read /nonexistent");

        assert_eq!(LoadError::segment(2, "x").kind(), ErrorKind::MalformedFormat);
        assert_eq!(
            LoadError::StartupStack("full".into()).kind(),
            ErrorKind::MappingFailure
        );
    }
}
