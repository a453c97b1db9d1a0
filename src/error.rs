//! Centralized error types for the mairix library.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mairix library.
#[derive(Error, Debug)]
pub enum MairixError {
    /// The on-disk index failed validation (magic, endianness, offsets,
    /// duplicated tokens, broken posting chains).
    #[error("Corrupt database '{path}': {reason}")]
    CorruptDatabase { path: PathBuf, reason: String },

    /// Two configured input paths resolve to the same mbox or message file.
    #[error("Duplicate input path: {0}")]
    DuplicateInput(PathBuf),

    /// A search argument could not be understood.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// I/O failure on a mail source (stat/open/mmap). The run continues,
    /// skipping the source.
    #[error("I/O error on mail source '{path}': {source}")]
    SourceIo {
        path: PathBuf,
        source: std::io::Error,
    },

    /// I/O failure on the index file itself. Fatal.
    #[error("I/O error on index '{path}': {source}")]
    IndexIo {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The database lock file exists and force-unlock was not requested.
    #[error("Database is locked: {0}")]
    LockUnavailable(String),

    /// The configuration file is missing required values or unparseable.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, MairixError>`.
pub type Result<T> = std::result::Result<T, MairixError>;

impl MairixError {
    /// Create a `SourceIo` variant from a path and an `io::Error`.
    pub fn source_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::SourceIo {
            path: path.into(),
            source,
        }
    }

    /// Create an `IndexIo` variant from a path and an `io::Error`.
    pub fn index_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IndexIo {
            path: path.into(),
            source,
        }
    }

    /// Create a `CorruptDatabase` variant.
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptDatabase {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
