#![forbid(unsafe_code)]
//! Generic fixed-size record store over a mapped file.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use super::format::{Record, RecordFormat, RecordLoad};
use super::options::StoreOptions;
use crate::primitives::idgen::{IdGenerator, IdRange, IdType, INTEGER_MINUS_ONE};
use crate::primitives::pager::{PageCache, PageCursor, PageLock, PagedFile};
use crate::types::{PageId, PenumbraError, Result};

/// Pages faulted in ahead of the backwards high id scan.
const SCAN_PREFETCH_PAGES: u64 = 256;

/// Lifecycle of a store.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreState {
    /// Not opened yet.
    Unopened,
    /// Header being read and record size determined.
    Opening,
    /// Open, but the id generator was not closed cleanly and must be rebuilt.
    OpenNotOk,
    /// Open and fully usable.
    OpenOk,
    /// Closed; every operation fails.
    Closed,
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct Lifecycle {
    state: StoreState,
    cause: Option<String>,
}

/// Page geometry of a store: where a record id lives.
#[derive(Clone, Copy, Debug)]
pub struct Layout {
    /// Bytes per record.
    pub record_size: usize,
    /// Records that fit in one page; pages hold whole records only.
    pub records_per_page: u64,
    /// Leading ids taken by the store header.
    pub reserved_low_ids: u64,
}

impl Layout {
    fn new(page_size: usize, record_size: usize, reserved_low_ids: u64) -> Result<Self> {
        if record_size == 0 || record_size > page_size {
            return Err(PenumbraError::UnderlyingStorage(format!(
                "record size {record_size} does not fit pages of {page_size} bytes"
            )));
        }
        Ok(Self {
            record_size,
            records_per_page: (page_size / record_size) as u64,
            reserved_low_ids,
        })
    }

    /// Page size used to map the file so records never straddle pages.
    pub fn file_page_size(&self) -> usize {
        self.records_per_page as usize * self.record_size
    }

    /// Page holding record `id`.
    pub fn page_id_for_record(&self, id: u64) -> PageId {
        PageId(id / self.records_per_page)
    }

    /// Byte offset of record `id` within its page.
    pub fn offset_for_id(&self, id: u64) -> usize {
        (id % self.records_per_page) as usize * self.record_size
    }
}

/// Store of fixed-size records of format `F`.
pub struct RecordStore<F: RecordFormat> {
    path: PathBuf,
    id_path: PathBuf,
    id_type: IdType,
    format: F,
    cache: Arc<PageCache>,
    file: Arc<PagedFile>,
    layout: Layout,
    header: Option<i32>,
    rebuild_fast: bool,
    id_generator: RwLock<Option<IdGenerator>>,
    lifecycle: Mutex<Lifecycle>,
}

/// Path of the id file belonging to `store_path`.
pub fn id_file_path(store_path: &Path) -> PathBuf {
    let mut name = OsString::from(store_path.as_os_str());
    name.push(".id");
    PathBuf::from(name)
}

impl<F: RecordFormat> RecordStore<F> {
    /// Opens the store at `path`, creating it when `create` is set.
    ///
    /// A store whose id file was not closed cleanly opens in
    /// [`StoreState::OpenNotOk`]; call [`RecordStore::make_store_ok`] once
    /// recovery is done.
    pub fn open(
        cache: &Arc<PageCache>,
        path: impl AsRef<Path>,
        id_type: IdType,
        format: F,
        options: &StoreOptions,
        create: bool,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let id_path = id_file_path(&path);
        let mut lifecycle = Lifecycle {
            state: StoreState::Unopened,
            cause: None,
        };
        let reserved_low_ids = format.store_header().map_or(0, |_| 1);
        if !path.exists() {
            if !create {
                return Err(PenumbraError::StoreNotFound(path));
            }
            Self::create_store_file(cache, &path, &id_path, &format, reserved_low_ids)?;
        }
        lifecycle.state = StoreState::Opening;
        let (file, layout, header) = Self::map_and_read_header(cache, &path, &format, reserved_low_ids)?;
        let id_generator = match IdGenerator::open(
            &id_path,
            id_type,
            || scan_for_high_id(&file, &layout, &format),
            format.max_id(),
        ) {
            Ok(gen) => {
                lifecycle.state = StoreState::OpenOk;
                Some(gen)
            }
            Err(PenumbraError::InvalidIdGenerator(cause)) => {
                warn!(
                    store = format.name(),
                    path = %path.display(),
                    cause = %cause,
                    "store.open.not_ok"
                );
                lifecycle.state = StoreState::OpenNotOk;
                lifecycle.cause = Some(cause);
                None
            }
            Err(err) => return Err(err),
        };
        debug!(
            store = format.name(),
            path = %path.display(),
            record_size = layout.record_size,
            state = %lifecycle.state,
            "store.open"
        );
        Ok(Self {
            path,
            id_path,
            id_type,
            format,
            cache: Arc::clone(cache),
            file,
            layout,
            header,
            rebuild_fast: options.rebuild_idgen_fast,
            id_generator: RwLock::new(id_generator),
            lifecycle: Mutex::new(lifecycle),
        })
    }

    fn create_store_file(
        cache: &PageCache,
        path: &Path,
        id_path: &Path,
        format: &F,
        reserved_low_ids: u64,
    ) -> Result<()> {
        let header = format.store_header();
        let layout = Layout::new(cache.page_size(), format.record_size(header), reserved_low_ids)?;
        IdGenerator::create(id_path, reserved_low_ids, false)?;
        let file = cache.map(path, layout.file_page_size(), true)?;
        if let Some(value) = header {
            let mut cursor = file.io(PageId(0), PageLock::SharedWrite);
            if cursor.next()? {
                cursor.set_offset(0);
                cursor.put_i32(value);
                if cursor.check_and_clear_bounds_flag() {
                    return Err(PenumbraError::UnderlyingStorage(format!(
                        "out of page bounds when writing header; page size too small: {} bytes",
                        file.page_size()
                    )));
                }
            }
        }
        file.flush_and_force()?;
        debug!(store = format.name(), path = %path.display(), "store.create");
        Ok(())
    }

    fn map_and_read_header(
        cache: &PageCache,
        path: &Path,
        format: &F,
        reserved_low_ids: u64,
    ) -> Result<(Arc<PagedFile>, Layout, Option<i32>)> {
        let default_header = format.store_header();
        let mut header = default_header;
        if default_header.is_some() {
            let probe_size = Layout::new(
                cache.page_size(),
                format.record_size(default_header),
                reserved_low_ids,
            )?
            .file_page_size();
            let probe = cache.map(path, probe_size, false)?;
            let mut cursor = probe.io(PageId(0), PageLock::SharedRead);
            if cursor.next()? {
                let value = loop {
                    cursor.set_offset(0);
                    let value = cursor.get_i32();
                    if !cursor.should_retry() {
                        break value;
                    }
                };
                if cursor.check_and_clear_bounds_flag() {
                    return Err(PenumbraError::UnderlyingStorage(format!(
                        "out of page bounds when reading header of {}",
                        path.display()
                    )));
                }
                header = Some(value);
            }
            drop(cursor);
            let layout = Layout::new(cache.page_size(), format.record_size(header), reserved_low_ids)?;
            if layout.file_page_size() == probe.page_size() {
                return Ok((probe, layout, header));
            }
            cache.unmap(path)?;
        }
        let layout = Layout::new(cache.page_size(), format.record_size(header), reserved_low_ids)?;
        let file = cache.map(path, layout.file_page_size(), false)?;
        Ok((file, layout, header))
    }

    /// Path of the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Format driving this store.
    pub fn format(&self) -> &F {
        &self.format
    }

    /// Kind of ids this store hands out.
    pub fn id_type(&self) -> IdType {
        self.id_type
    }

    /// Page geometry.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Bytes per record.
    pub fn record_size(&self) -> usize {
        self.layout.record_size
    }

    /// Bytes per record available to payload.
    pub fn record_data_size(&self) -> usize {
        self.layout.record_size - self.format.record_header_size()
    }

    /// Records per page.
    pub fn records_per_page(&self) -> u64 {
        self.layout.records_per_page
    }

    /// Leading ids reserved for the store header.
    pub fn number_of_reserved_low_ids(&self) -> u64 {
        self.layout.reserved_low_ids
    }

    /// Value of the header int, for stores that have one.
    pub fn store_header_int(&self) -> Option<i32> {
        self.header
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StoreState {
        self.lifecycle.lock().state
    }

    fn ensure_open(&self) -> Result<()> {
        match self.lifecycle.lock().state {
            StoreState::OpenOk | StoreState::OpenNotOk => Ok(()),
            _ => Err(PenumbraError::IllegalState("store is not open")),
        }
    }

    /// Fails with the cause recorded at open when the store is not ok.
    pub fn verify_store_ok(&self) -> Result<()> {
        let lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            StoreState::OpenOk => Ok(()),
            state => Err(PenumbraError::UnderlyingStorage(format!(
                "{} store {} is {state}: {}",
                self.format.name(),
                self.path.display(),
                lifecycle.cause.as_deref().unwrap_or("no cause recorded")
            ))),
        }
    }

    fn with_id_generator<T>(&self, f: impl FnOnce(&IdGenerator) -> Result<T>) -> Result<T> {
        let guard = self.id_generator.read();
        match guard.as_ref() {
            Some(gen) => f(gen),
            None => Err(PenumbraError::IllegalState("id generator is not initialized")),
        }
    }

    /// Allocates an id.
    pub fn next_id(&self) -> Result<u64> {
        self.with_id_generator(IdGenerator::next_id)
    }

    /// Allocates `size` ids.
    pub fn next_id_batch(&self, size: usize) -> Result<IdRange> {
        self.with_id_generator(|gen| gen.next_id_batch(size))
    }

    /// Releases `id` for reuse. Does nothing until the store is ok, since the
    /// id generator cannot be trusted before it has been rebuilt.
    pub fn free_id(&self, id: u64) -> Result<()> {
        if self.state() != StoreState::OpenOk {
            return Ok(());
        }
        let guard = self.id_generator.read();
        match guard.as_ref() {
            Some(gen) => gen.free_id(id),
            None => Ok(()),
        }
    }

    /// One past the highest id in use. Scans the file when no id generator is available.
    pub fn high_id(&self) -> Result<u64> {
        if let Some(gen) = self.id_generator.read().as_ref() {
            return Ok(gen.high_id());
        }
        self.scan_for_high_id()
    }

    /// Raises the high id to `high_id` if it is currently lower.
    pub fn set_high_id(&self, high_id: u64) {
        if let Some(gen) = self.id_generator.read().as_ref() {
            gen.raise_high_id(high_id);
        }
    }

    /// Highest id that may be in use, `None` for an empty store.
    pub fn highest_possible_id_in_use(&self) -> Result<Option<u64>> {
        if let Some(gen) = self.id_generator.read().as_ref() {
            return Ok(gen.highest_possible_id_in_use());
        }
        Ok(self.scan_for_high_id()?.checked_sub(1))
    }

    /// Makes `id` the highest possible id in use. Ids past the format's
    /// maximum are refused.
    pub fn set_highest_possible_id_in_use(&self, id: u64) -> Result<()> {
        if id > self.format.max_id() {
            return Err(PenumbraError::Invalid("id is beyond the maximum id of the format"));
        }
        self.set_high_id(id + 1);
        Ok(())
    }

    /// Number of ids currently in use.
    pub fn number_of_ids_in_use(&self) -> Result<u64> {
        self.with_id_generator(|gen| Ok(gen.number_of_ids_in_use()))
    }

    /// A fresh unused record with the given id.
    pub fn new_record(&self, id: u64) -> F::Record {
        let mut record = F::Record::default();
        record.set_id(id);
        record
    }

    /// Loads record `id` according to `mode`.
    pub fn get_record(&self, id: u64, mode: RecordLoad) -> Result<F::Record> {
        let record_size = self.layout.record_size;
        self.read_record_by(id, mode, |cursor| {
            self.format.read(id, cursor, mode, record_size)
        })
    }

    /// Loads record `id` with a caller supplied decoder run inside the retry loop.
    pub(crate) fn read_record_by<D>(&self, id: u64, mode: RecordLoad, mut decode: D) -> Result<F::Record>
    where
        D: FnMut(&mut PageCursor) -> F::Record,
    {
        self.ensure_open()?;
        let page = self.layout.page_id_for_record(id);
        let offset = self.layout.offset_for_id(id);
        let mut cursor = self.file.io(page, PageLock::SharedRead);
        if !cursor.next_page(page)? {
            return self.verify_after_reading(self.new_record(id), mode);
        }
        let record = loop {
            cursor.set_offset(offset);
            let record = decode(&mut cursor);
            if !cursor.should_retry() {
                break record;
            }
        };
        if cursor.check_and_clear_bounds_flag() {
            if mode.checks_bounds() {
                return Err(self.out_of_bounds(id, &cursor));
            }
            return Ok(self.new_record(id));
        }
        if let Some(message) = cursor.check_and_clear_cursor_error() {
            if mode.fails_on_decode_error() {
                return Err(PenumbraError::InvalidRecord(message));
            }
            if mode == RecordLoad::LenientCheck {
                return Ok(self.new_record(id));
            }
        }
        self.verify_after_reading(record, mode)
    }

    fn verify_after_reading(&self, mut record: F::Record, mode: RecordLoad) -> Result<F::Record> {
        if record.in_use() || mode == RecordLoad::Force {
            return Ok(record);
        }
        if mode == RecordLoad::Normal {
            return Err(PenumbraError::InvalidRecord(format!(
                "{} record {} not in use",
                self.format.name(),
                record.id()
            )));
        }
        record.clear();
        Ok(record)
    }

    fn out_of_bounds(&self, id: u64, cursor: &PageCursor) -> PenumbraError {
        PenumbraError::UnderlyingStorage(format!(
            "access to {} record {id} went out of bounds of the page. The record size is {} bytes, \
             and the access was at offset {} bytes into page {}, and the pages have a capacity of {} bytes. \
             The mapped store file in question is {}",
            self.format.name(),
            self.layout.record_size,
            self.layout.offset_for_id(id),
            self.layout.page_id_for_record(id),
            cursor.page_size(),
            self.path.display()
        ))
    }

    /// Whether record `id` is in use, without decoding it.
    pub fn is_in_use(&self, id: u64) -> Result<bool> {
        self.ensure_open()?;
        let page = self.layout.page_id_for_record(id);
        let offset = self.layout.offset_for_id(id);
        let mut cursor = self.file.io(page, PageLock::SharedRead);
        if !cursor.next_page(page)? {
            return Ok(false);
        }
        let in_use = loop {
            cursor.set_offset(offset);
            let in_use = self.format.is_in_use(&mut cursor);
            if !cursor.should_retry() {
                break in_use;
            }
        };
        if cursor.check_and_clear_bounds_flag() {
            return Err(self.out_of_bounds(id, &cursor));
        }
        Ok(in_use)
    }

    /// Writes `record` and updates id bookkeeping.
    ///
    /// Records written as unused have their id freed; created records are
    /// marked used; a secondary unit that is no longer required is freed.
    pub fn update_record(&self, record: &F::Record) -> Result<()> {
        self.ensure_open()?;
        let id = record.id();
        if id > self.format.max_id() || id == INTEGER_MINUS_ONE {
            return Err(PenumbraError::Invalid("record id outside the valid id range"));
        }
        if id < self.layout.reserved_low_ids {
            return Err(PenumbraError::Invalid("record id is reserved for the store header"));
        }
        let page = self.layout.page_id_for_record(id);
        {
            let mut cursor = self.file.io(page, PageLock::SharedWrite);
            if cursor.next_page(page)? {
                cursor.set_offset(self.layout.offset_for_id(id));
                self.format.write(record, &mut cursor, self.layout.record_size);
                if cursor.check_and_clear_bounds_flag() {
                    return Err(self.out_of_bounds(id, &cursor));
                }
            }
        }
        trace!(store = self.format.name(), id, in_use = record.in_use(), "store.update");
        if !record.in_use() {
            self.free_id(id)?;
        } else if record.is_created() {
            self.mark_id_used(id);
        }
        if let Some(secondary) = record.secondary_unit_id() {
            if !record.in_use() || !record.requires_secondary_unit() {
                self.free_id(secondary)?;
            } else if record.is_created() {
                self.mark_id_used(secondary);
            }
        }
        Ok(())
    }

    fn mark_id_used(&self, id: u64) {
        if let Some(gen) = self.id_generator.read().as_ref() {
            gen.mark_used(id);
        }
    }

    /// Finds the high id by scanning the file backwards, ignoring the id generator.
    pub fn scan_for_high_id(&self) -> Result<u64> {
        self.ensure_open()?;
        scan_for_high_id(&self.file, &self.layout, &self.format)
    }

    /// Throws away the id generator and rebuilds it from the store file.
    ///
    /// Fast mode only restores the high id; otherwise every unused slot below it
    /// is freed and reservation markers are cleared.
    pub fn rebuild_id_generator(&self) -> Result<()> {
        let mut slot = self.id_generator.write();
        match slot.take() {
            Some(gen) => gen.delete()?,
            None => match std::fs::remove_file(&self.id_path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            },
        }
        let high_id = scan_for_high_id(&self.file, &self.layout, &self.format)?;
        IdGenerator::create(&self.id_path, high_id, false)?;
        let gen = IdGenerator::open(&self.id_path, self.id_type, || Ok(high_id), self.format.max_id())?;
        let mut freed = 0u64;
        if !self.rebuild_fast {
            let (unused, reserved) = self.collect_unused_ids(high_id)?;
            self.clear_reserved_slots(&reserved)?;
            for id in unused {
                gen.free_id(id)?;
                freed += 1;
            }
        }
        debug!(
            store = self.format.name(),
            high_id,
            freed,
            fast = self.rebuild_fast,
            "store.rebuild_idgen"
        );
        *slot = Some(gen);
        Ok(())
    }

    fn collect_unused_ids(&self, high_id: u64) -> Result<(Vec<u64>, Vec<u64>)> {
        let mut unused = Vec::new();
        let mut reserved = Vec::new();
        let rpp = self.layout.records_per_page;
        let mut cursor = self.file.io(PageId(0), PageLock::SharedRead);
        let mut done = false;
        while !done && cursor.next()? {
            let Some(page) = cursor.current_page_id() else {
                break;
            };
            let (page_unused, page_reserved) = loop {
                let mut page_unused = Vec::new();
                let mut page_reserved = Vec::new();
                for slot in 0..rpp {
                    let id = page.0 * rpp + slot;
                    if id < self.layout.reserved_low_ids {
                        continue;
                    }
                    if id >= high_id {
                        done = true;
                        break;
                    }
                    let offset = slot as usize * self.layout.record_size;
                    cursor.set_offset(offset);
                    if self.format.is_in_use(&mut cursor) {
                        continue;
                    }
                    cursor.set_offset(offset);
                    if self.format.is_record_reserved(&mut cursor) {
                        page_reserved.push(id);
                    }
                    page_unused.push(id);
                }
                if !cursor.should_retry() {
                    break (page_unused, page_reserved);
                }
            };
            if cursor.check_and_clear_bounds_flag() {
                return Err(self.out_of_bounds(page.0 * rpp, &cursor));
            }
            unused.extend(page_unused);
            reserved.extend(page_reserved);
        }
        Ok((unused, reserved))
    }

    fn clear_reserved_slots(&self, ids: &[u64]) -> Result<()> {
        let zeros = vec![0u8; self.format.record_header_size().max(1)];
        for &id in ids {
            let page = self.layout.page_id_for_record(id);
            let mut cursor = self.file.io(page, PageLock::SharedWrite);
            if cursor.next_page(page)? {
                cursor.set_offset(self.layout.offset_for_id(id));
                cursor.put_bytes(&zeros);
            }
        }
        Ok(())
    }

    /// Rebuilds the id generator if the store is not ok. No-op when already ok.
    pub fn make_store_ok(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            StoreState::OpenOk => return Ok(()),
            StoreState::OpenNotOk => {}
            _ => return Err(PenumbraError::IllegalState("store is not open")),
        }
        self.rebuild_id_generator()?;
        lifecycle.state = StoreState::OpenOk;
        lifecycle.cause = None;
        debug!(store = self.format.name(), path = %self.path.display(), "store.make_ok");
        Ok(())
    }

    /// Visits every in-use record below the high id, tolerating damaged slots.
    pub fn scan_all_records<V>(&self, mut visitor: V) -> Result<()>
    where
        V: FnMut(&F::Record) -> Result<()>,
    {
        let high_id = self.high_id()?;
        for id in self.layout.reserved_low_ids..high_id {
            let record = self.get_record(id, RecordLoad::LenientCheck)?;
            if record.in_use() {
                visitor(&record)?;
            }
        }
        Ok(())
    }

    /// Loads the chain of records starting at `first_id`.
    pub fn get_records(
        &self,
        first_id: u64,
        mode: RecordLoad,
        guard_for_cycles: bool,
    ) -> Result<Vec<F::Record>> {
        let mut records = Vec::new();
        self.stream_records(first_id, mode, guard_for_cycles, |record| {
            records.push(record);
            true
        })?;
        Ok(records)
    }

    /// Feeds the chain starting at `first_id` to `subscriber` until it returns false.
    /// Unused records are passed on as well.
    pub fn stream_records<S>(
        &self,
        first_id: u64,
        mode: RecordLoad,
        guard_for_cycles: bool,
        mut subscriber: S,
    ) -> Result<()>
    where
        S: FnMut(F::Record) -> bool,
    {
        let mut seen = HashSet::new();
        let mut next = Some(first_id);
        while let Some(id) = next {
            if guard_for_cycles && !seen.insert(id) {
                warn!(store = self.format.name(), first_id, id, "store.chain.cycle");
                return Err(PenumbraError::CycleDetected(format!(
                    "cycle detected in {} chain starting at id {first_id}, and finding id {id} twice in the chain",
                    self.format.name()
                )));
            }
            let record = self.get_record(id, mode)?;
            next = self.format.next_record_reference(&record);
            if !subscriber(record) {
                break;
            }
        }
        Ok(())
    }

    /// Writes dirty pages and checkpoints the id generator.
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.file.flush_and_force()?;
        if let Some(gen) = self.id_generator.read().as_ref() {
            gen.checkpoint()?;
        }
        Ok(())
    }

    /// Flushes, closes the id generator and unmaps the file.
    ///
    /// A store that is not ok keeps its id file marked unclean.
    pub fn close(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == StoreState::Closed {
            return Ok(());
        }
        self.file.flush_and_force()?;
        if let Some(gen) = self.id_generator.write().take() {
            gen.close()?;
        }
        self.cache.unmap(&self.path)?;
        lifecycle.state = StoreState::Closed;
        debug!(store = self.format.name(), path = %self.path.display(), "store.close");
        Ok(())
    }
}

/// Backwards scan for one past the highest in-use record.
fn scan_for_high_id<F: RecordFormat>(file: &Arc<PagedFile>, layout: &Layout, format: &F) -> Result<u64> {
    let Some(last) = file.last_page_id() else {
        return Ok(layout.reserved_low_ids);
    };
    let rpp = layout.records_per_page;
    let mut cursor = file.io(last, PageLock::SharedRead);
    let mut chunk_end = last.0;
    loop {
        let chunk_start = chunk_end.saturating_sub(SCAN_PREFETCH_PAGES - 1);
        file.prefetch(PageId(chunk_start), PageId(chunk_end))?;
        let mut page = chunk_end;
        loop {
            if cursor.next_page(PageId(page))? {
                let highest = loop {
                    let mut highest = None;
                    for slot in 0..rpp {
                        cursor.set_offset(slot as usize * layout.record_size);
                        if format.is_in_use(&mut cursor) {
                            highest = Some(page * rpp + slot + 1);
                        }
                    }
                    if !cursor.should_retry() {
                        break highest;
                    }
                };
                if cursor.check_and_clear_bounds_flag() {
                    return Err(PenumbraError::UnderlyingStorage(format!(
                        "out of page bounds scanning page {page} of {} for the high id",
                        file.path().display()
                    )));
                }
                if let Some(high_id) = highest {
                    let high_id = high_id.max(layout.reserved_low_ids);
                    trace!(store = format.name(), high_id, page, "store.scan_high_id");
                    return Ok(high_id);
                }
            }
            if page == chunk_start {
                break;
            }
            page -= 1;
        }
        if chunk_start == 0 {
            return Ok(layout.reserved_low_ids);
        }
        chunk_end = chunk_start - 1;
    }
}
