//! Low-level building blocks the record stores sit on.
//!
//! Bit packing, positioned file I/O, the page cache with its retrying
//! cursors, and the id generator.

/// Bit packing and checked buffer reading.
pub mod bytes;

/// Id allocation with a persisted free list.
pub mod idgen;

/// Positioned file I/O.
pub mod io;

/// Page cache and page cursors.
///
/// Read cursors are optimistic and must be driven in a retry loop; write
/// cursors pin their page exclusively.
pub mod pager;
