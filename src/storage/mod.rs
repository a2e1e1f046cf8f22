//! Record stores and the engines built on top of them.
//!
//! Every store is a file of fixed-size records addressed by id. Variable
//! length payloads spill into dynamic stores of chained blocks, and the
//! [`StoreAggregate`] opens the full set for one database directory.

/// Record formats: how each record kind maps onto bytes.
pub mod format;

/// Property values and their codecs.
pub mod values;

/// Chains of fixed-size blocks holding variable-length data.
pub mod dynamic;

/// Inline and dynamic node label fields.
pub mod labels;

mod meta;
mod node;
mod options;
mod property;
mod store;
mod stores;
mod tokens;

pub use dynamic::DynamicStore;
pub use format::{RecordFormat, RecordLoad};
pub use meta::{version_long_to_string, version_string_to_long, MetaDataStore, Position, STORE_VERSION};
pub use node::NodeStore;
pub use options::{FormatCapabilities, StoreOptions};
pub use property::PropertyStore;
pub use store::{id_file_path, Layout, RecordStore, StoreState};
pub use stores::{ManagedStore, StoreAggregate, StoreType};
pub use tokens::{NamedToken, TokenStore};
pub use values::{ArrayValue, PropertyType, Value};
