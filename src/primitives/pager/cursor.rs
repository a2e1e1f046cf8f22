use std::sync::Arc;

use parking_lot::{lock_api::ArcRwLockWriteGuard, RawRwLock};

use super::file::PagedFile;
use super::frame::Frame;
use crate::types::{PageId, Result};

/// How a cursor pins its pages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PageLock {
    /// Optimistic read; callers loop on [`PageCursor::should_retry`].
    SharedRead,
    /// Exclusive write; moving past the end of the file grows it.
    SharedWrite,
}

enum Pinned {
    Read {
        id: PageId,
        frame: Arc<Frame>,
        version: u64,
    },
    Write {
        id: PageId,
        frame: Arc<Frame>,
        guard: ArcRwLockWriteGuard<RawRwLock, Box<[u8]>>,
    },
}

impl Pinned {
    fn id(&self) -> PageId {
        match self {
            Pinned::Read { id, .. } | Pinned::Write { id, .. } => *id,
        }
    }
}

/// Positioned access to the pages of a [`PagedFile`].
///
/// All multi-byte accessors are big-endian and advance the offset. Access
/// outside the page raises the bounds flag and reads zero instead of panicking.
pub struct PageCursor {
    file: Arc<PagedFile>,
    lock: PageLock,
    next_page: u64,
    pinned: Option<Pinned>,
    offset: usize,
    mark: usize,
    out_of_bounds: bool,
    error: Option<String>,
}

impl PageCursor {
    pub(crate) fn new(file: Arc<PagedFile>, start: PageId, lock: PageLock) -> Self {
        Self {
            file,
            lock,
            next_page: start.0,
            pinned: None,
            offset: 0,
            mark: 0,
            out_of_bounds: false,
            error: None,
        }
    }

    /// Moves to the page after the current one (or the start page on first call).
    pub fn next(&mut self) -> Result<bool> {
        let id = PageId(self.next_page);
        self.next_page(id)
    }

    /// Moves to page `id`. Read cursors return false past the end of the file.
    pub fn next_page(&mut self, id: PageId) -> Result<bool> {
        if self.pinned.as_ref().map(Pinned::id) == Some(id) {
            self.offset = 0;
            self.next_page = id.0 + 1;
            return Ok(true);
        }
        self.unpin();
        let grow = self.lock == PageLock::SharedWrite;
        let Some(frame) = self.file.frame(id, grow)? else {
            return Ok(false);
        };
        self.pinned = Some(match self.lock {
            PageLock::SharedRead => {
                let version = frame.stable_version();
                Pinned::Read { id, frame, version }
            }
            PageLock::SharedWrite => {
                let guard = frame.buf.write_arc();
                frame.begin_write();
                Pinned::Write { id, frame, guard }
            }
        });
        self.offset = 0;
        self.next_page = id.0 + 1;
        Ok(true)
    }

    /// Page the cursor currently sits on.
    pub fn current_page_id(&self) -> Option<PageId> {
        self.pinned.as_ref().map(Pinned::id)
    }

    /// Highest page id of the underlying file.
    pub fn last_page_id(&self) -> Option<PageId> {
        self.file.last_page_id()
    }

    /// Page size of the underlying file.
    pub fn page_size(&self) -> usize {
        self.file.page_size()
    }

    /// Returns true when a read may have observed a concurrent write and must be redone.
    pub fn should_retry(&mut self) -> bool {
        let Some(Pinned::Read { frame, version, .. }) = self.pinned.as_mut() else {
            return false;
        };
        let now = frame.stable_version();
        if now == *version {
            return false;
        }
        *version = now;
        self.out_of_bounds = false;
        self.error = None;
        true
    }

    /// Reports and clears whether any access went outside the page.
    pub fn check_and_clear_bounds_flag(&mut self) -> bool {
        std::mem::replace(&mut self.out_of_bounds, false)
    }

    /// Records a decode inconsistency, reported after the retry loop.
    pub fn set_cursor_error(&mut self, message: String) {
        self.error = Some(message);
    }

    /// Takes any decode inconsistency recorded on this cursor.
    pub fn check_and_clear_cursor_error(&mut self) -> Option<String> {
        self.error.take()
    }

    /// Current byte offset within the page.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Positions the cursor at `offset` within the current page.
    pub fn set_offset(&mut self, offset: usize) {
        if offset > self.file.page_size() {
            self.out_of_bounds = true;
        }
        self.offset = offset;
    }

    /// Remembers the current offset.
    pub fn mark(&mut self) {
        self.mark = self.offset;
    }

    /// Returns to the last marked offset.
    pub fn set_offset_to_mark(&mut self) {
        self.offset = self.mark;
    }

    fn read_into(&mut self, dst: &mut [u8]) {
        let start = self.offset;
        let end = start + dst.len();
        self.offset = end;
        let copied = match self.pinned.as_ref() {
            Some(Pinned::Read { frame, .. }) => {
                let data = frame.buf.read();
                copy_out(&data, start, end, dst)
            }
            Some(Pinned::Write { guard, .. }) => copy_out(guard, start, end, dst),
            None => false,
        };
        if !copied {
            dst.fill(0);
            self.out_of_bounds = true;
        }
    }

    fn write_from(&mut self, src: &[u8]) {
        let start = self.offset;
        let end = start + src.len();
        self.offset = end;
        let written = match self.pinned.as_mut() {
            Some(Pinned::Write { guard, .. }) if end <= guard.len() => {
                guard[start..end].copy_from_slice(src);
                true
            }
            _ => false,
        };
        if !written {
            self.out_of_bounds = true;
        }
    }

    /// Reads one byte.
    pub fn get_u8(&mut self) -> u8 {
        let mut b = [0u8; 1];
        self.read_into(&mut b);
        b[0]
    }

    /// Reads a big-endian `u16`.
    pub fn get_u16(&mut self) -> u16 {
        let mut b = [0u8; 2];
        self.read_into(&mut b);
        u16::from_be_bytes(b)
    }

    /// Reads a big-endian `u32`.
    pub fn get_u32(&mut self) -> u32 {
        let mut b = [0u8; 4];
        self.read_into(&mut b);
        u32::from_be_bytes(b)
    }

    /// Reads a big-endian `i32`.
    pub fn get_i32(&mut self) -> i32 {
        self.get_u32() as i32
    }

    /// Reads a big-endian `u64`.
    pub fn get_u64(&mut self) -> u64 {
        let mut b = [0u8; 8];
        self.read_into(&mut b);
        u64::from_be_bytes(b)
    }

    /// Reads a big-endian `i64`.
    pub fn get_i64(&mut self) -> i64 {
        self.get_u64() as i64
    }

    /// Fills `dst` from the page.
    pub fn get_bytes(&mut self, dst: &mut [u8]) {
        self.read_into(dst);
    }

    /// Writes one byte.
    pub fn put_u8(&mut self, v: u8) {
        self.write_from(&[v]);
    }

    /// Writes a big-endian `u16`.
    pub fn put_u16(&mut self, v: u16) {
        self.write_from(&v.to_be_bytes());
    }

    /// Writes a big-endian `u32`.
    pub fn put_u32(&mut self, v: u32) {
        self.write_from(&v.to_be_bytes());
    }

    /// Writes a big-endian `i32`.
    pub fn put_i32(&mut self, v: i32) {
        self.write_from(&v.to_be_bytes());
    }

    /// Writes a big-endian `u64`.
    pub fn put_u64(&mut self, v: u64) {
        self.write_from(&v.to_be_bytes());
    }

    /// Writes a big-endian `i64`.
    pub fn put_i64(&mut self, v: i64) {
        self.write_from(&v.to_be_bytes());
    }

    /// Copies `src` into the page.
    pub fn put_bytes(&mut self, src: &[u8]) {
        self.write_from(src);
    }

    fn unpin(&mut self) {
        if let Some(Pinned::Write { frame, guard, .. }) = self.pinned.take() {
            frame.end_write();
            drop(guard);
        }
    }
}

fn copy_out(data: &[u8], start: usize, end: usize, dst: &mut [u8]) -> bool {
    match data.get(start..end) {
        Some(src) => {
            dst.copy_from_slice(src);
            true
        }
        None => false,
    }
}

impl Drop for PageCursor {
    fn drop(&mut self) {
        self.unpin();
    }
}
