#![forbid(unsafe_code)]

mod cursor;
mod file;
mod frame;

pub use cursor::{PageCursor, PageLock};
pub use file::{PageCache, PagedFile, PagedFileStats};
