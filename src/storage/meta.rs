#![forbid(unsafe_code)]
//! Positional longs describing the whole database.

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::debug;

use super::format::{MetaDataRecord, MetaDataRecordFormat, Record, RecordLoad};
use super::options::StoreOptions;
use super::store::RecordStore;
use crate::primitives::idgen::IdType;
use crate::primitives::pager::PageCache;
use crate::types::{PenumbraError, Result};

/// Version string written into new stores.
pub const STORE_VERSION: &str = "PN0.1.0";

/// Fixed field positions of the meta data store.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Position {
    /// Creation time in milliseconds since the epoch.
    Time = 0,
    /// Random identity of the store.
    RandomNumber = 1,
    /// Current log version.
    LogVersion = 2,
    /// Last committed transaction id.
    LastTransactionId = 3,
    /// Encoded store format version.
    StoreVersion = 4,
    /// First graph property record.
    FirstGraphProperty = 5,
    /// Last transaction that changed constraints.
    LastConstraintTransaction = 6,
    /// Transaction id at the last upgrade.
    UpgradeTransactionId = 7,
    /// Time of the last upgrade.
    UpgradeTime = 8,
    /// Checksum of the last committed transaction.
    LastTransactionChecksum = 9,
    /// Checksum of the upgrade transaction.
    UpgradeTransactionChecksum = 10,
    /// Log version of the last closed transaction.
    LastClosedTransactionLogVersion = 11,
    /// Log byte offset of the last closed transaction.
    LastClosedTransactionLogByteOffset = 12,
    /// Commit timestamp of the last committed transaction.
    LastTransactionCommitTimestamp = 13,
    /// Commit timestamp of the upgrade transaction.
    UpgradeTransactionCommitTimestamp = 14,
}

impl Position {
    /// Every position in order.
    pub const ALL: [Position; 15] = [
        Position::Time,
        Position::RandomNumber,
        Position::LogVersion,
        Position::LastTransactionId,
        Position::StoreVersion,
        Position::FirstGraphProperty,
        Position::LastConstraintTransaction,
        Position::UpgradeTransactionId,
        Position::UpgradeTime,
        Position::LastTransactionChecksum,
        Position::UpgradeTransactionChecksum,
        Position::LastClosedTransactionLogVersion,
        Position::LastClosedTransactionLogByteOffset,
        Position::LastTransactionCommitTimestamp,
        Position::UpgradeTransactionCommitTimestamp,
    ];

    /// Record id of the field.
    pub fn id(self) -> u64 {
        self as u64
    }
}

/// Packs a version string of at most seven ASCII bytes into a long: the
/// length in the top byte, then the bytes.
pub fn version_string_to_long(version: &str) -> Result<i64> {
    let bytes = version.as_bytes();
    if bytes.len() > 7 || !version.is_ascii() {
        return Err(PenumbraError::Invalid("store version must be at most seven ascii bytes"));
    }
    let mut value = (bytes.len() as u64) << 56;
    for (i, &b) in bytes.iter().enumerate() {
        value |= (b as u64) << (48 - 8 * i);
    }
    Ok(value as i64)
}

/// Unpacks a long written by [`version_string_to_long`].
pub fn version_long_to_string(value: i64) -> Option<String> {
    let value = value as u64;
    let len = (value >> 56) as usize;
    if len > 7 {
        return None;
    }
    let bytes: Vec<u8> = (0..len).map(|i| (value >> (48 - 8 * i)) as u8).collect();
    String::from_utf8(bytes).ok()
}

/// Meta data store.
pub struct MetaDataStore {
    store: RecordStore<MetaDataRecordFormat>,
    version_lock: Mutex<()>,
}

impl MetaDataStore {
    /// Opens the meta data store at `path`. A newly created store gets its
    /// creation time, a random number and the store version.
    pub fn open(
        cache: &Arc<PageCache>,
        path: impl AsRef<Path>,
        options: &StoreOptions,
        create: bool,
    ) -> Result<Self> {
        let path = path.as_ref();
        let fresh = !path.exists();
        let store = RecordStore::open(cache, path, IdType::MetaData, MetaDataRecordFormat, options, create)?;
        let meta = Self {
            store,
            version_lock: Mutex::new(()),
        };
        if fresh {
            let now = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            meta.set_record(Position::Time, now)?;
            meta.set_record(Position::RandomNumber, rand::random::<i64>())?;
            meta.set_record(Position::StoreVersion, version_string_to_long(STORE_VERSION)?)?;
            meta.set_record(Position::LogVersion, 0)?;
            meta.set_record(Position::LastTransactionId, 1)?;
            debug!(path = %path.display(), version = STORE_VERSION, "meta.init");
        }
        Ok(meta)
    }

    /// Underlying record store.
    pub fn store(&self) -> &RecordStore<MetaDataRecordFormat> {
        &self.store
    }

    /// Value at `position`, `None` if it has never been written.
    pub fn get_record(&self, position: Position) -> Result<Option<i64>> {
        let record = self.store.get_record(position.id(), RecordLoad::Check)?;
        Ok(record.in_use.then_some(record.value))
    }

    /// Writes `value` at `position`.
    pub fn set_record(&self, position: Position, value: i64) -> Result<()> {
        let mut record = MetaDataRecord {
            id: position.id(),
            in_use: true,
            value,
            ..MetaDataRecord::default()
        };
        record.set_created();
        self.store.update_record(&record)
    }

    fn required(&self, position: Position) -> Result<i64> {
        self.get_record(position)?.ok_or_else(|| {
            PenumbraError::InvalidRecord(format!("meta data field {position:?} is not present"))
        })
    }

    /// Creation time in milliseconds.
    pub fn creation_time(&self) -> Result<i64> {
        self.required(Position::Time)
    }

    /// Random identity of the store.
    pub fn random_number(&self) -> Result<i64> {
        self.required(Position::RandomNumber)
    }

    /// Store version string.
    pub fn store_version(&self) -> Result<String> {
        let value = self.required(Position::StoreVersion)?;
        version_long_to_string(value)
            .ok_or_else(|| PenumbraError::InvalidRecord(format!("store version {value:#x} is malformed")))
    }

    /// Last committed transaction id.
    pub fn last_committed_transaction_id(&self) -> Result<i64> {
        self.required(Position::LastTransactionId)
    }

    /// Records `id` as the last committed transaction.
    pub fn set_last_committed_transaction_id(&self, id: i64) -> Result<()> {
        self.set_record(Position::LastTransactionId, id)
    }

    /// Current log version.
    pub fn log_version(&self) -> Result<i64> {
        self.required(Position::LogVersion)
    }

    /// Bumps the log version and returns the new value.
    pub fn increment_and_get_version(&self) -> Result<i64> {
        let _guard = self.version_lock.lock();
        let next = self.get_record(Position::LogVersion)?.unwrap_or(0) + 1;
        self.set_record(Position::LogVersion, next)?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_store_is_initialised() {
        let dir = tempdir().unwrap();
        let options = StoreOptions::default().page_size(512);
        let cache = Arc::new(PageCache::new(options.page_size));
        let meta = MetaDataStore::open(&cache, dir.path().join("meta"), &options, true).unwrap();
        assert_eq!(meta.store_version().unwrap(), STORE_VERSION);
        assert!(meta.creation_time().unwrap() > 0);
        assert_eq!(meta.log_version().unwrap(), 0);
        assert_eq!(meta.increment_and_get_version().unwrap(), 1);
        assert_eq!(meta.increment_and_get_version().unwrap(), 2);
        assert_eq!(meta.get_record(Position::UpgradeTime).unwrap(), None);

        let random = meta.random_number().unwrap();
        meta.store().close().unwrap();
        let meta = MetaDataStore::open(&cache, dir.path().join("meta"), &options, false).unwrap();
        assert_eq!(meta.random_number().unwrap(), random);
        assert_eq!(meta.log_version().unwrap(), 2);
    }

    #[test]
    fn version_strings_pack_into_a_long() {
        let packed = version_string_to_long("v0.A.9").unwrap();
        assert_eq!(version_long_to_string(packed).as_deref(), Some("v0.A.9"));
        assert!(version_string_to_long("too long!").is_err());
    }
}
