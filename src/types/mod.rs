#![forbid(unsafe_code)]
//! Identifiers and the error type shared by every layer of the crate.

use std::fmt;
use std::path::PathBuf;

/// Index of a page within a mapped store file.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u64);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors surfaced by the record engine.
#[derive(thiserror::Error, Debug)]
pub enum PenumbraError {
    /// Raw I/O failure from the operating system.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// The store file does not exist and creation was not requested.
    #[error("store file not found: {}", .0.display())]
    StoreNotFound(PathBuf),
    /// A record failed an in-use or consistency check while loading.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    /// Fatal storage failure carrying file/page diagnostics.
    #[error("underlying storage: {0}")]
    UnderlyingStorage(String),
    /// The on-disk format generation cannot represent the requested value.
    #[error("unsupported format capability: {0}")]
    UnsupportedFormatCapability(&'static str),
    /// The operation is not permitted in the current store state.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),
    /// The id generator file is missing, unclean or unreadable.
    #[error("invalid id generator: {0}")]
    InvalidIdGenerator(String),
    /// A record chain references the same id twice.
    #[error("cycle detected: {0}")]
    CycleDetected(String),
    /// Caller supplied an argument outside the accepted domain.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PenumbraError>;
