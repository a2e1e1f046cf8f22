use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// One cached page.
///
/// Writers take `buf` exclusively and bump `version` on pin and on release, so
/// the counter is odd while a write cursor sits on the page. Optimistic readers
/// compare the version seen at pin time against the current one.
pub struct Frame {
    pub buf: Arc<RwLock<Box<[u8]>>>,
    version: AtomicU64,
    dirty: AtomicBool,
}

impl Frame {
    pub fn new(data: Box<[u8]>) -> Self {
        Self {
            buf: Arc::new(RwLock::new(data)),
            version: AtomicU64::new(0),
            dirty: AtomicBool::new(false),
        }
    }

    /// Version as observed while no writer holds the page.
    pub fn stable_version(&self) -> u64 {
        let _guard = self.buf.read();
        self.version.load(Ordering::Acquire)
    }

    pub fn begin_write(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    pub fn end_write(&self) {
        self.dirty.store(true, Ordering::Release);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }
}
