#![forbid(unsafe_code)]
//! Label, relationship type and property key tokens.
//!
//! A token record holds the first block of its name in a dynamic name store;
//! the token id is the record id.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use super::dynamic::{concat_data, DynamicStore};
use super::format::{Record, RecordFormat, RecordLoad, TokenKind, TokenRecord, TokenRecordFormat};
use super::options::StoreOptions;
use super::store::RecordStore;
use crate::primitives::idgen::IdType;
use crate::primitives::pager::PageCache;
use crate::types::{PenumbraError, Result};

/// A token id with its name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamedToken {
    /// Token id.
    pub id: u32,
    /// Token name.
    pub name: String,
}

/// Token store of one kind with its name store.
pub struct TokenStore {
    store: RecordStore<TokenRecordFormat>,
    names: Arc<DynamicStore>,
}

impl TokenStore {
    /// Id type used by token stores of `kind`.
    pub fn id_type(kind: TokenKind) -> IdType {
        match kind {
            TokenKind::Label => IdType::LabelToken,
            TokenKind::RelationshipType => IdType::RelationshipTypeToken,
            TokenKind::PropertyKey => IdType::PropertyKeyToken,
        }
    }

    /// Id type used by the name stores of `kind`.
    pub fn name_id_type(kind: TokenKind) -> IdType {
        match kind {
            TokenKind::Label => IdType::LabelTokenName,
            TokenKind::RelationshipType => IdType::RelationshipTypeTokenName,
            TokenKind::PropertyKey => IdType::PropertyKeyTokenName,
        }
    }

    /// Opens the token store at `path` on top of an opened name store.
    pub fn open(
        cache: &Arc<PageCache>,
        path: impl AsRef<Path>,
        kind: TokenKind,
        names: Arc<DynamicStore>,
        options: &StoreOptions,
        create: bool,
    ) -> Result<Self> {
        let store = RecordStore::open(
            cache,
            path,
            Self::id_type(kind),
            TokenRecordFormat::new(kind),
            options,
            create,
        )?;
        Ok(Self { store, names })
    }

    /// Underlying record store.
    pub fn store(&self) -> &RecordStore<TokenRecordFormat> {
        &self.store
    }

    /// Name store.
    pub fn name_store(&self) -> &Arc<DynamicStore> {
        &self.names
    }

    /// Kind of tokens held.
    pub fn kind(&self) -> TokenKind {
        self.store.format().kind()
    }

    /// Creates a token named `name` and returns its id.
    pub fn create_token(&self, name: &str) -> Result<u32> {
        let id = self.store.next_id()?;
        if id > self.kind().max_id() {
            return Err(PenumbraError::Invalid("token id space exhausted"));
        }
        let name_records = self.names.store_bytes(name.as_bytes(), Vec::new())?;
        let name_id = name_records
            .first()
            .map(|r| r.id)
            .ok_or(PenumbraError::IllegalState("allocation produced no records"))?;
        let name_id = u32::try_from(name_id)
            .map_err(|_| PenumbraError::Invalid("token name id does not fit 32 bits"))?;
        let mut record = TokenRecord {
            id,
            in_use: true,
            name_id,
            name_records,
            ..TokenRecord::default()
        };
        record.set_created();
        self.store.update_record(&record)?;
        debug!(store = self.store.format().name(), id, token = name, "token.create");
        Ok(id as u32)
    }

    fn name_of(&self, record: &TokenRecord) -> Result<String> {
        let mut bytes = Vec::new();
        if record.name_records.is_empty() {
            bytes = self.names.get_bytes(record.name_id as u64)?;
        } else {
            concat_data(&record.name_records, &mut bytes);
        }
        String::from_utf8(bytes).map_err(|_| {
            PenumbraError::InvalidRecord(format!("token {} has a name that is not utf-8", record.id))
        })
    }

    /// Loads token `id` with its name.
    pub fn get_token(&self, id: u32) -> Result<NamedToken> {
        let record = self.store.get_record(id as u64, RecordLoad::Normal)?;
        Ok(NamedToken {
            id,
            name: self.name_of(&record)?,
        })
    }

    /// Loads the token record `id` with its name blocks.
    pub fn get_record(&self, id: u32, mode: RecordLoad) -> Result<TokenRecord> {
        let mut record = self.store.get_record(id as u64, mode)?;
        if record.in_use {
            record.name_records = self.names.get_records(record.name_id as u64, true)?;
        }
        Ok(record)
    }

    /// Every token in use, in id order.
    pub fn all_tokens(&self) -> Result<Vec<NamedToken>> {
        let mut tokens = Vec::new();
        self.store.scan_all_records(|record| {
            tokens.push(NamedToken {
                id: record.id as u32,
                name: self.name_of(record)?,
            });
            Ok(())
        })?;
        Ok(tokens)
    }

    /// Id of the token named `name`, if present.
    pub fn token_id(&self, name: &str) -> Result<Option<u32>> {
        Ok(self
            .all_tokens()?
            .into_iter()
            .find(|t| t.name == name)
            .map(|t| t.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &Path, kind: TokenKind) -> TokenStore {
        let options = StoreOptions::default().page_size(512);
        let cache = Arc::new(PageCache::new(options.page_size));
        let names = DynamicStore::open(
            &cache,
            dir.join("names"),
            TokenStore::name_id_type(kind),
            "token names",
            options.token_name_block_size,
            &options,
            true,
        )
        .unwrap();
        TokenStore::open(&cache, dir.join("tokens"), kind, Arc::new(names), &options, true).unwrap()
    }

    #[test]
    fn tokens_keep_their_names() {
        let dir = tempdir().unwrap();
        let store = open(dir.path(), TokenKind::PropertyKey);
        let short = store.create_token("name").unwrap();
        let long = store
            .create_token("a property key whose name needs more than one block")
            .unwrap();
        assert_eq!(short, 0);
        assert_eq!(long, 1);
        assert_eq!(store.get_token(long).unwrap().name.len(), 51);
        let all = store.all_tokens().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "name");
        assert_eq!(store.token_id("name").unwrap(), Some(0));
        assert_eq!(store.token_id("missing").unwrap(), None);
    }

    #[test]
    fn unknown_token_is_an_invalid_record() {
        let dir = tempdir().unwrap();
        let store = open(dir.path(), TokenKind::Label);
        assert!(matches!(store.get_token(3), Err(PenumbraError::InvalidRecord(_))));
        let record = store.get_record(3, RecordLoad::Check).unwrap();
        assert!(!record.in_use);
    }
}
