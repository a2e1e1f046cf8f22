#![forbid(unsafe_code)]
//! Every store of a database directory, opened lazily in dependency order.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::dynamic::DynamicStore;
use super::format::{RecordFormat, RelationshipGroupFormat, RelationshipRecordFormat, TokenKind};
use super::meta::MetaDataStore;
use super::node::NodeStore;
use super::options::StoreOptions;
use super::property::PropertyStore;
use super::store::{RecordStore, StoreState};
use super::tokens::TokenStore;
use crate::primitives::idgen::IdType;
use crate::primitives::pager::PageCache;
use crate::types::{PenumbraError, Result};

/// Kinds of stores making up a database.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StoreType {
    /// Label sets too large for a node record.
    NodeLabels,
    /// Nodes.
    Node,
    /// Property key names.
    PropertyKeyTokenName,
    /// Property keys.
    PropertyKeyToken,
    /// Long strings.
    PropertyString,
    /// Large arrays.
    PropertyArray,
    /// Properties.
    Property,
    /// Relationship type names.
    RelationshipTypeTokenName,
    /// Relationship types.
    RelationshipTypeToken,
    /// Label names.
    LabelTokenName,
    /// Labels.
    LabelToken,
    /// Relationships.
    Relationship,
    /// Relationship groups of dense nodes.
    RelationshipGroup,
    /// Schema rules.
    Schema,
    /// Meta data.
    MetaData,
}

impl StoreType {
    /// Every store type, dependencies before dependents.
    pub const ALL: [StoreType; 15] = [
        StoreType::NodeLabels,
        StoreType::Node,
        StoreType::PropertyKeyTokenName,
        StoreType::PropertyKeyToken,
        StoreType::PropertyString,
        StoreType::PropertyArray,
        StoreType::Property,
        StoreType::RelationshipTypeTokenName,
        StoreType::RelationshipTypeToken,
        StoreType::LabelTokenName,
        StoreType::LabelToken,
        StoreType::Relationship,
        StoreType::RelationshipGroup,
        StoreType::Schema,
        StoreType::MetaData,
    ];

    /// File name within the database directory.
    pub fn file_name(self) -> &'static str {
        match self {
            StoreType::NodeLabels => "penumbra.nodestore.db.labels",
            StoreType::Node => "penumbra.nodestore.db",
            StoreType::PropertyKeyTokenName => "penumbra.propertystore.db.index.keys",
            StoreType::PropertyKeyToken => "penumbra.propertystore.db.index",
            StoreType::PropertyString => "penumbra.propertystore.db.strings",
            StoreType::PropertyArray => "penumbra.propertystore.db.arrays",
            StoreType::Property => "penumbra.propertystore.db",
            StoreType::RelationshipTypeTokenName => "penumbra.relationshiptypestore.db.names",
            StoreType::RelationshipTypeToken => "penumbra.relationshiptypestore.db",
            StoreType::LabelTokenName => "penumbra.labeltokenstore.db.names",
            StoreType::LabelToken => "penumbra.labeltokenstore.db",
            StoreType::Relationship => "penumbra.relationshipstore.db",
            StoreType::RelationshipGroup => "penumbra.relationshipgroupstore.db",
            StoreType::Schema => "penumbra.schemastore.db",
            StoreType::MetaData => "penumbra",
        }
    }

    /// Stores that must be open before this one.
    pub fn dependencies(self) -> &'static [StoreType] {
        match self {
            StoreType::Node => &[StoreType::NodeLabels],
            StoreType::PropertyKeyToken => &[StoreType::PropertyKeyTokenName],
            StoreType::Property => &[StoreType::PropertyString, StoreType::PropertyArray],
            StoreType::RelationshipTypeToken => &[StoreType::RelationshipTypeTokenName],
            StoreType::LabelToken => &[StoreType::LabelTokenName],
            _ => &[],
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Lifecycle operations shared by every store kind.
pub trait ManagedStore: Send + Sync {
    /// Path of the store file.
    fn path(&self) -> &Path;
    /// Current lifecycle state.
    fn state(&self) -> StoreState;
    /// Rebuilds the id generator of a store that is not ok.
    fn make_store_ok(&self) -> Result<()>;
    /// Fails with the recorded cause if the store is not ok.
    fn verify_store_ok(&self) -> Result<()>;
    /// Forces dirty pages and id state to disk.
    fn flush(&self) -> Result<()>;
    /// Closes the store.
    fn close(&self) -> Result<()>;
}

impl<F: RecordFormat> ManagedStore for RecordStore<F> {
    fn path(&self) -> &Path {
        RecordStore::path(self)
    }
    fn state(&self) -> StoreState {
        RecordStore::state(self)
    }
    fn make_store_ok(&self) -> Result<()> {
        RecordStore::make_store_ok(self)
    }
    fn verify_store_ok(&self) -> Result<()> {
        RecordStore::verify_store_ok(self)
    }
    fn flush(&self) -> Result<()> {
        RecordStore::flush(self)
    }
    fn close(&self) -> Result<()> {
        RecordStore::close(self)
    }
}

#[derive(Clone)]
enum OpenedStore {
    Dynamic(Arc<DynamicStore>),
    Node(Arc<NodeStore>),
    Property(Arc<PropertyStore>),
    Token(Arc<TokenStore>),
    Relationship(Arc<RecordStore<RelationshipRecordFormat>>),
    Group(Arc<RecordStore<RelationshipGroupFormat>>),
    Meta(Arc<MetaDataStore>),
}

impl OpenedStore {
    fn managed(&self) -> &dyn ManagedStore {
        match self {
            OpenedStore::Dynamic(s) => s.store(),
            OpenedStore::Node(s) => s.store(),
            OpenedStore::Property(s) => s.store(),
            OpenedStore::Token(s) => s.store(),
            OpenedStore::Relationship(s) => s.as_ref(),
            OpenedStore::Group(s) => s.as_ref(),
            OpenedStore::Meta(s) => s.store(),
        }
    }
}

#[derive(Default)]
struct Opened {
    stores: HashMap<StoreType, OpenedStore>,
    order: Vec<StoreType>,
}

/// The stores of one database directory sharing a page cache.
pub struct StoreAggregate {
    dir: PathBuf,
    cache: Arc<PageCache>,
    options: StoreOptions,
    create: bool,
    opened: Mutex<Opened>,
}

macro_rules! typed_accessor {
    ($(#[$doc:meta])* $name:ident, $ty:expr, $variant:ident, $out:ty) => {
        $(#[$doc])*
        pub fn $name(&self) -> Result<Arc<$out>> {
            match self.open_store($ty)? {
                OpenedStore::$variant(store) => Ok(store),
                _ => Err(PenumbraError::IllegalState("store opened with an unexpected kind")),
            }
        }
    };
}

impl StoreAggregate {
    /// Prepares the stores in `dir`. Nothing is opened until first use.
    pub fn open(dir: impl AsRef<Path>, options: StoreOptions, create: bool) -> Result<Self> {
        options.validate()?;
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            if !create {
                return Err(PenumbraError::StoreNotFound(dir));
            }
            std::fs::create_dir_all(&dir)?;
        }
        let cache = Arc::new(PageCache::new(options.page_size));
        debug!(dir = %dir.display(), page_size = options.page_size, create, "stores.open");
        Ok(Self {
            dir,
            cache,
            options,
            create,
            opened: Mutex::new(Opened::default()),
        })
    }

    /// Database directory.
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Page cache shared by every store.
    pub fn page_cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    /// Options the stores were opened with.
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Opens every store.
    pub fn open_all(&self) -> Result<()> {
        for ty in StoreType::ALL {
            self.open_store(ty)?;
        }
        Ok(())
    }

    /// Store types opened so far, in opening order.
    pub fn opened_stores(&self) -> Vec<StoreType> {
        self.opened.lock().order.clone()
    }

    fn open_store(&self, ty: StoreType) -> Result<OpenedStore> {
        let mut opened = self.opened.lock();
        self.open_locked(&mut opened, ty)
    }

    fn open_locked(&self, opened: &mut Opened, ty: StoreType) -> Result<OpenedStore> {
        if let Some(store) = opened.stores.get(&ty) {
            return Ok(store.clone());
        }
        let mut deps = Vec::with_capacity(ty.dependencies().len());
        for &dep in ty.dependencies() {
            deps.push(self.open_locked(opened, dep)?);
        }
        let store = self.instantiate(ty, &deps)?;
        debug!(store = %ty, state = %store.managed().state(), "stores.instantiate");
        opened.stores.insert(ty, store.clone());
        opened.order.push(ty);
        Ok(store)
    }

    fn dynamic(&self, ty: StoreType, id_type: IdType, name: &'static str, data_size: usize) -> Result<OpenedStore> {
        let store = DynamicStore::open(
            &self.cache,
            self.dir.join(ty.file_name()),
            id_type,
            name,
            data_size,
            &self.options,
            self.create,
        )?;
        Ok(OpenedStore::Dynamic(Arc::new(store)))
    }

    fn token(&self, ty: StoreType, kind: TokenKind, deps: &[OpenedStore]) -> Result<OpenedStore> {
        let names = dynamic_dependency(deps, 0)?;
        let store = TokenStore::open(
            &self.cache,
            self.dir.join(ty.file_name()),
            kind,
            names,
            &self.options,
            self.create,
        )?;
        Ok(OpenedStore::Token(Arc::new(store)))
    }

    fn instantiate(&self, ty: StoreType, deps: &[OpenedStore]) -> Result<OpenedStore> {
        let path = self.dir.join(ty.file_name());
        let options = &self.options;
        Ok(match ty {
            StoreType::NodeLabels => {
                self.dynamic(ty, IdType::NodeLabels, "node labels", options.label_block_size)?
            }
            StoreType::PropertyString => {
                self.dynamic(ty, IdType::StringBlock, "string", options.string_block_size)?
            }
            StoreType::PropertyArray => {
                self.dynamic(ty, IdType::ArrayBlock, "array", options.array_block_size)?
            }
            StoreType::Schema => self.dynamic(ty, IdType::Schema, "schema", options.schema_block_size)?,
            StoreType::PropertyKeyTokenName => self.dynamic(
                ty,
                IdType::PropertyKeyTokenName,
                "property key token names",
                options.token_name_block_size,
            )?,
            StoreType::RelationshipTypeTokenName => self.dynamic(
                ty,
                IdType::RelationshipTypeTokenName,
                "relationship type token names",
                options.token_name_block_size,
            )?,
            StoreType::LabelTokenName => self.dynamic(
                ty,
                IdType::LabelTokenName,
                "label token names",
                options.token_name_block_size,
            )?,
            StoreType::PropertyKeyToken => self.token(ty, TokenKind::PropertyKey, deps)?,
            StoreType::RelationshipTypeToken => self.token(ty, TokenKind::RelationshipType, deps)?,
            StoreType::LabelToken => self.token(ty, TokenKind::Label, deps)?,
            StoreType::Node => OpenedStore::Node(Arc::new(NodeStore::open(
                &self.cache,
                path,
                dynamic_dependency(deps, 0)?,
                options,
                self.create,
            )?)),
            StoreType::Property => OpenedStore::Property(Arc::new(PropertyStore::open(
                &self.cache,
                path,
                dynamic_dependency(deps, 0)?,
                dynamic_dependency(deps, 1)?,
                options,
                self.create,
            )?)),
            StoreType::Relationship => OpenedStore::Relationship(Arc::new(RecordStore::open(
                &self.cache,
                path,
                IdType::Relationship,
                RelationshipRecordFormat,
                options,
                self.create,
            )?)),
            StoreType::RelationshipGroup => OpenedStore::Group(Arc::new(RecordStore::open(
                &self.cache,
                path,
                IdType::RelationshipGroup,
                RelationshipGroupFormat::new(options.dense_node_threshold),
                options,
                self.create,
            )?)),
            StoreType::MetaData => {
                OpenedStore::Meta(Arc::new(MetaDataStore::open(&self.cache, path, options, self.create)?))
            }
        })
    }

    typed_accessor!(
        /// Node store, opening the label block store first.
        node_store, StoreType::Node, Node, NodeStore
    );
    typed_accessor!(
        /// Property store, opening the string and array stores first.
        property_store, StoreType::Property, Property, PropertyStore
    );
    typed_accessor!(
        /// Relationship store.
        relationship_store, StoreType::Relationship, Relationship, RecordStore<RelationshipRecordFormat>
    );
    typed_accessor!(
        /// Relationship group store.
        relationship_group_store, StoreType::RelationshipGroup, Group, RecordStore<RelationshipGroupFormat>
    );
    typed_accessor!(
        /// Label token store.
        label_token_store, StoreType::LabelToken, Token, TokenStore
    );
    typed_accessor!(
        /// Relationship type token store.
        relationship_type_token_store, StoreType::RelationshipTypeToken, Token, TokenStore
    );
    typed_accessor!(
        /// Property key token store.
        property_key_token_store, StoreType::PropertyKeyToken, Token, TokenStore
    );
    typed_accessor!(
        /// Schema block store.
        schema_store, StoreType::Schema, Dynamic, DynamicStore
    );
    typed_accessor!(
        /// Meta data store.
        meta_data_store, StoreType::MetaData, Meta, MetaDataStore
    );

    fn each_opened(&self) -> Vec<(StoreType, OpenedStore)> {
        let opened = self.opened.lock();
        opened
            .order
            .iter()
            .filter_map(|ty| opened.stores.get(ty).map(|s| (*ty, s.clone())))
            .collect()
    }

    /// Rebuilds the id generators of every opened store that is not ok.
    pub fn make_store_ok(&self) -> Result<()> {
        for (ty, store) in self.each_opened() {
            if store.managed().state() == StoreState::OpenNotOk {
                debug!(store = %ty, "stores.make_ok");
            }
            store.managed().make_store_ok()?;
        }
        Ok(())
    }

    /// Fails with the first not-ok cause among the opened stores.
    pub fn verify_store_ok(&self) -> Result<()> {
        for (_, store) in self.each_opened() {
            store.managed().verify_store_ok()?;
        }
        Ok(())
    }

    /// Opened stores that still need [`StoreAggregate::make_store_ok`].
    pub fn not_ok_stores(&self) -> Vec<StoreType> {
        self.each_opened()
            .into_iter()
            .filter(|(_, s)| s.managed().state() == StoreState::OpenNotOk)
            .map(|(ty, _)| ty)
            .collect()
    }

    /// Flushes every opened store.
    pub fn flush(&self) -> Result<()> {
        for (_, store) in self.each_opened() {
            store.managed().flush()?;
        }
        Ok(())
    }

    /// Closes every opened store, dependents first. Keeps going after a
    /// failure and returns the first error.
    pub fn close(&self) -> Result<()> {
        let mut opened = self.opened.lock();
        let mut first_error = None;
        for ty in opened.order.iter().rev() {
            let Some(store) = opened.stores.get(ty) else {
                continue;
            };
            if let Err(err) = store.managed().close() {
                warn!(store = %ty, error = %err, "stores.close.failed");
                first_error.get_or_insert(err);
            }
        }
        opened.stores.clear();
        opened.order.clear();
        debug!(dir = %self.dir.display(), "stores.close");
        first_error.map_or(Ok(()), Err)
    }
}

fn dynamic_dependency(deps: &[OpenedStore], index: usize) -> Result<Arc<DynamicStore>> {
    match deps.get(index) {
        Some(OpenedStore::Dynamic(store)) => Ok(Arc::clone(store)),
        _ => Err(PenumbraError::IllegalState("missing dynamic store dependency")),
    }
}
