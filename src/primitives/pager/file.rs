use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::cursor::{PageCursor, PageLock};
use super::frame::Frame;
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{PageId, PenumbraError, Result};

/// Counters for a mapped file.
#[derive(Default)]
struct FileStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writebacks: AtomicU64,
}

/// Snapshot of page cache activity for one file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PagedFileStats {
    /// Page lookups served from memory.
    pub hits: u64,
    /// Page lookups that had to fault the page in from disk.
    pub misses: u64,
    /// Dirty pages written back by flushes.
    pub writebacks: u64,
}

/// A store file mapped into the page cache.
pub struct PagedFile {
    path: PathBuf,
    io: Arc<dyn FileIo>,
    page_size: usize,
    frames: Mutex<HashMap<PageId, Arc<Frame>>>,
    page_count: AtomicU64,
    stats: FileStats,
}

impl PagedFile {
    pub(crate) fn new(path: PathBuf, io: Arc<dyn FileIo>, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(PenumbraError::Invalid("page size must be non-zero"));
        }
        let len = io.len()?;
        let page_count = len.div_ceil(page_size as u64);
        Ok(Self {
            path,
            io,
            page_size,
            frames: Mutex::new(HashMap::new()),
            page_count: AtomicU64::new(page_count),
            stats: FileStats::default(),
        })
    }

    /// Path of the mapped file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of every page of this file in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Highest page id that exists, or `None` for an empty file.
    pub fn last_page_id(&self) -> Option<PageId> {
        self.page_count
            .load(Ordering::Acquire)
            .checked_sub(1)
            .map(PageId)
    }

    /// Opens a cursor that starts at `start` with the given lock mode.
    pub fn io(self: &Arc<Self>, start: PageId, lock: PageLock) -> PageCursor {
        PageCursor::new(Arc::clone(self), start, lock)
    }

    /// Faults in every page of `range` that is not yet cached.
    pub fn prefetch(&self, first: PageId, last: PageId) -> Result<()> {
        let mut id = first.0;
        while id <= last.0 {
            self.frame(PageId(id), false)?;
            id += 1;
        }
        Ok(())
    }

    /// Returns the frame for `id`. Pages past the end of the file only exist when `grow` is set.
    pub(crate) fn frame(&self, id: PageId, grow: bool) -> Result<Option<Arc<Frame>>> {
        let count = self.page_count.load(Ordering::Acquire);
        if id.0 >= count && !grow {
            return Ok(None);
        }
        let mut frames = self.frames.lock();
        if let Some(frame) = frames.get(&id) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(Arc::clone(frame)));
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let mut data = vec![0u8; self.page_size].into_boxed_slice();
        self.io
            .read_available(id.0 * self.page_size as u64, &mut data)?;
        let frame = Arc::new(Frame::new(data));
        if id.0 >= count {
            frame.mark_dirty();
            self.page_count.fetch_max(id.0 + 1, Ordering::AcqRel);
            trace!(page = id.0, path = %self.path.display(), "pager.grow");
        }
        frames.insert(id, Arc::clone(&frame));
        Ok(Some(frame))
    }

    /// Writes every dirty page back and syncs the file.
    pub fn flush_and_force(&self) -> Result<()> {
        let snapshot: Vec<(PageId, Arc<Frame>)> = {
            let frames = self.frames.lock();
            frames.iter().map(|(id, f)| (*id, Arc::clone(f))).collect()
        };
        let mut written = 0u64;
        for (id, frame) in snapshot {
            let data = frame.buf.read();
            if !frame.take_dirty() {
                continue;
            }
            self.io.write_at(id.0 * self.page_size as u64, &data)?;
            written += 1;
        }
        self.io.sync_all()?;
        self.stats.writebacks.fetch_add(written, Ordering::Relaxed);
        debug!(pages = written, path = %self.path.display(), "pager.flush");
        Ok(())
    }

    /// Current counters.
    pub fn stats(&self) -> PagedFileStats {
        PagedFileStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            writebacks: self.stats.writebacks.load(Ordering::Relaxed),
        }
    }

    /// Size of the file as seen through the cache.
    pub fn file_size(&self) -> u64 {
        self.page_count.load(Ordering::Acquire) * self.page_size as u64
    }
}

/// Registry of mapped files sharing one default page size.
pub struct PageCache {
    page_size: usize,
    mapped: Mutex<HashMap<PathBuf, Arc<PagedFile>>>,
}

impl PageCache {
    /// Creates a cache whose default page size is `page_size` bytes.
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            mapped: Mutex::new(HashMap::new()),
        }
    }

    /// Default page size of this cache.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Maps `path` with `file_page_size` byte pages. An already mapped file is
    /// returned as is when the page size matches.
    pub fn map(
        &self,
        path: impl AsRef<Path>,
        file_page_size: usize,
        create: bool,
    ) -> Result<Arc<PagedFile>> {
        let path = path.as_ref().to_path_buf();
        let mut mapped = self.mapped.lock();
        if let Some(file) = mapped.get(&path) {
            if file.page_size() != file_page_size {
                return Err(PenumbraError::Invalid(
                    "file already mapped with a different page size",
                ));
            }
            return Ok(Arc::clone(file));
        }
        let io = if create {
            StdFileIo::open(&path)?
        } else {
            match StdFileIo::open_existing(&path) {
                Ok(io) => io,
                Err(PenumbraError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                    return Err(PenumbraError::StoreNotFound(path));
                }
                Err(err) => return Err(err),
            }
        };
        let file = Arc::new(PagedFile::new(path.clone(), Arc::new(io), file_page_size)?);
        debug!(path = %path.display(), page_size = file_page_size, "pager.map");
        mapped.insert(path, Arc::clone(&file));
        Ok(file)
    }

    /// Flushes and forgets the mapping for `path`.
    pub fn unmap(&self, path: impl AsRef<Path>) -> Result<()> {
        let removed = self.mapped.lock().remove(path.as_ref());
        if let Some(file) = removed {
            file.flush_and_force()?;
        }
        Ok(())
    }

    /// Flushes every mapped file.
    pub fn flush_all(&self) -> Result<()> {
        let files: Vec<Arc<PagedFile>> = self.mapped.lock().values().cloned().collect();
        for file in files {
            file.flush_and_force()?;
        }
        Ok(())
    }
}
