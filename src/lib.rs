//! Penumbra: a record store engine for property graphs.
//!
//! Nodes, relationships, properties and tokens live in files of fixed-size
//! records read through a shared page cache, with ids handed out by
//! persistent id generators.

#![warn(missing_docs)]

pub mod primitives;
pub mod storage;
pub mod types;

pub use storage::{StoreAggregate, StoreOptions};
pub use types::{PenumbraError, Result};
