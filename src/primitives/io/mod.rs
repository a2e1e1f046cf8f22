#![forbid(unsafe_code)]

use std::{
    fs::{File, OpenOptions},
    io::{self, ErrorKind},
    path::Path,
    sync::Arc,
};

use tracing::trace;

use crate::types::{PenumbraError, Result};

/// Positioned file access used by the page cache.
pub trait FileIo: Send + Sync + 'static {
    /// Reads exactly `dst.len()` bytes at `off`; fails with `UnexpectedEof` on a short file.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Reads as many bytes as the file holds at `off`, zero-filling the rest of `dst`.
    /// Returns the number of bytes that came from the file.
    fn read_available(&self, off: u64, dst: &mut [u8]) -> Result<usize> {
        let len = self.len()?;
        if off >= len {
            dst.fill(0);
            return Ok(0);
        }
        let avail = ((len - off) as usize).min(dst.len());
        self.read_at(off, &mut dst[..avail])?;
        dst[avail..].fill(0);
        Ok(avail)
    }
    /// Writes all of `src` at `off`, extending the file if needed.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Flushes file data and metadata to stable storage.
    fn sync_all(&self) -> Result<()>;
    /// Current file length in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the file is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Truncates or extends the file.
    fn truncate(&self, len: u64) -> Result<()>;
}

#[cfg(unix)]
mod sys {
    use std::{fs::File, io, os::unix::fs::FileExt};

    pub fn read_at(file: &File, buf: &mut [u8], off: u64) -> io::Result<usize> {
        file.read_at(buf, off)
    }

    pub fn write_at(file: &File, buf: &[u8], off: u64) -> io::Result<usize> {
        file.write_at(buf, off)
    }
}

#[cfg(windows)]
mod sys {
    use std::{fs::File, io, os::windows::fs::FileExt};

    pub fn read_at(file: &File, buf: &mut [u8], off: u64) -> io::Result<usize> {
        file.seek_read(buf, off)
    }

    pub fn write_at(file: &File, buf: &[u8], off: u64) -> io::Result<usize> {
        file.seek_write(buf, off)
    }
}

/// [`FileIo`] over a shared `std::fs::File` using pread/pwrite style calls.
#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    /// Wraps an already opened file.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Opens `path` read-write, creating it when absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self::new(file))
    }

    /// Opens an existing file read-write; `NotFound` is reported as an I/O error.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self::new(file))
    }

    fn read_exact(&self, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        while !dst.is_empty() {
            let read = sys::read_at(&self.inner, dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "read_at reached EOF",
                ));
            }
            dst = &mut dst[read..];
            off += read as u64;
        }
        Ok(())
    }

    fn write_all(&self, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        while !src.is_empty() {
            let written = sys::write_at(&self.inner, src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "write_at wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        self.read_exact(off, dst).map_err(PenumbraError::from)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        trace!(off, len = src.len(), "io.write_at");
        self.write_all(off, src).map_err(PenumbraError::from)
    }

    fn sync_all(&self) -> Result<()> {
        trace!("io.sync_all");
        self.inner.sync_all().map_err(PenumbraError::from)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.inner.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.inner.set_len(len).map_err(PenumbraError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let io = StdFileIo::open(dir.path().join("io.bin")).unwrap();
        io.write_at(4, b"record").unwrap();
        io.sync_all().unwrap();
        let mut buf = [0u8; 6];
        io.read_at(4, &mut buf).unwrap();
        assert_eq!(&buf, b"record");
        assert_eq!(io.len().unwrap(), 10);
    }

    #[test]
    fn read_past_eof_is_an_error() {
        let dir = tempdir().unwrap();
        let io = StdFileIo::open(dir.path().join("io.bin")).unwrap();
        let mut buf = [0u8; 8];
        match io.read_at(0, &mut buf).unwrap_err() {
            PenumbraError::Io(inner) => assert_eq!(inner.kind(), ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn read_available_zero_fills_tail() {
        let dir = tempdir().unwrap();
        let io = StdFileIo::open(dir.path().join("io.bin")).unwrap();
        io.write_at(0, &[7u8; 3]).unwrap();
        let mut buf = [0xAAu8; 8];
        assert_eq!(io.read_available(0, &mut buf).unwrap(), 3);
        assert_eq!(buf, [7, 7, 7, 0, 0, 0, 0, 0]);
        assert_eq!(io.read_available(100, &mut buf).unwrap(), 0);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn open_existing_requires_file() {
        let dir = tempdir().unwrap();
        assert!(StdFileIo::open_existing(dir.path().join("missing")).is_err());
    }
}
