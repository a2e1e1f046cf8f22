#![forbid(unsafe_code)]
//! Free-list id allocation for record stores.
//!
//! The id file holds a one byte marker, the big-endian high id and then the
//! free ids as big-endian longs. The marker is set to sticky while the
//! generator is open and only reset by [`IdGenerator::close`], so a file left
//! sticky after a crash is refused on the next open and the owning store must
//! rebuild it from the store file.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{PenumbraError, Result};

const MARKER_CLEAN: u8 = 0;
const MARKER_STICKY: u8 = 1;
const HEADER_LEN: usize = 9;

/// The 32-bit all-ones value doubles as the null reference in several record
/// formats, so it is never handed out as an id.
pub const INTEGER_MINUS_ONE: u64 = 0xFFFF_FFFF;

/// Kind of id a generator hands out.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum IdType {
    /// Node records.
    Node,
    /// Relationship records.
    Relationship,
    /// Relationship group records.
    RelationshipGroup,
    /// Property records.
    Property,
    /// Dynamic string blocks.
    StringBlock,
    /// Dynamic array blocks.
    ArrayBlock,
    /// Dynamic node label blocks.
    NodeLabels,
    /// Schema blocks.
    Schema,
    /// Label token records.
    LabelToken,
    /// Label token name blocks.
    LabelTokenName,
    /// Relationship type token records.
    RelationshipTypeToken,
    /// Relationship type token name blocks.
    RelationshipTypeTokenName,
    /// Property key token records.
    PropertyKeyToken,
    /// Property key token name blocks.
    PropertyKeyTokenName,
    /// Meta data records.
    MetaData,
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Ids handed out by [`IdGenerator::next_id_batch`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdRange {
    /// Previously freed ids that are being reused.
    pub reused: Vec<u64>,
    /// First id of the fresh contiguous range.
    pub range_start: u64,
    /// Number of ids in the fresh range.
    pub range_length: u64,
}

impl IdRange {
    /// All ids of the batch, reused ones first.
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.reused
            .iter()
            .copied()
            .chain(self.range_start..self.range_start + self.range_length)
    }

    /// Total number of ids in the batch.
    pub fn len(&self) -> usize {
        self.reused.len() + self.range_length as usize
    }

    /// Returns true for an empty batch.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct IdState {
    high_id: u64,
    free: BTreeSet<u64>,
    closed: bool,
}

/// Tracks the high id and reusable ids of one store.
pub struct IdGenerator {
    path: PathBuf,
    id_type: IdType,
    max_id: u64,
    state: Mutex<IdState>,
}

impl IdGenerator {
    /// Writes a fresh, clean id file with the given high id.
    pub fn create(path: impl AsRef<Path>, high_id: u64, throw_if_exists: bool) -> Result<()> {
        let path = path.as_ref();
        if throw_if_exists && path.exists() {
            return Err(PenumbraError::InvalidIdGenerator(format!(
                "id file {} already exists",
                path.display()
            )));
        }
        write_state(path, MARKER_CLEAN, high_id, std::iter::empty())?;
        debug!(path = %path.display(), high_id, "idgen.create");
        Ok(())
    }

    /// Opens an id file, creating it from `high_id_supplier` when absent.
    ///
    /// A file that was not closed cleanly is refused.
    pub fn open<F>(
        path: impl AsRef<Path>,
        id_type: IdType,
        high_id_supplier: F,
        max_id: u64,
    ) -> Result<Self>
    where
        F: FnOnce() -> Result<u64>,
    {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            let high_id = high_id_supplier()?;
            Self::create(&path, high_id, false)?;
        }
        let bytes = fs::read(&path)?;
        if bytes.len() < HEADER_LEN || (bytes.len() - HEADER_LEN) % 8 != 0 {
            return Err(PenumbraError::InvalidIdGenerator(format!(
                "id file {} has invalid length {}",
                path.display(),
                bytes.len()
            )));
        }
        if bytes[0] != MARKER_CLEAN {
            return Err(PenumbraError::InvalidIdGenerator(format!(
                "id file {} was not closed cleanly",
                path.display()
            )));
        }
        let high_id = read_u64(&bytes[1..HEADER_LEN]);
        let free: BTreeSet<u64> = bytes[HEADER_LEN..]
            .chunks_exact(8)
            .map(read_u64)
            .filter(|id| *id < high_id)
            .collect();
        StdFileIo::open_existing(&path)?.write_at(0, &[MARKER_STICKY])?;
        debug!(
            path = %path.display(),
            id_type = %id_type,
            high_id,
            free = free.len(),
            "idgen.open"
        );
        Ok(Self {
            path,
            id_type,
            max_id,
            state: Mutex::new(IdState {
                high_id,
                free,
                closed: false,
            }),
        })
    }

    /// Kind of ids this generator hands out.
    pub fn id_type(&self) -> IdType {
        self.id_type
    }

    /// Returns a reusable id if one is free, otherwise the high id.
    pub fn next_id(&self) -> Result<u64> {
        let mut state = self.state.lock();
        self.next_id_locked(&mut state)
    }

    fn next_id_locked(&self, state: &mut IdState) -> Result<u64> {
        if state.closed {
            return Err(PenumbraError::IllegalState("id generator is closed"));
        }
        if let Some(id) = state.free.pop_first() {
            return Ok(id);
        }
        let mut id = state.high_id;
        if id == INTEGER_MINUS_ONE {
            id += 1;
        }
        if id > self.max_id {
            return Err(PenumbraError::UnderlyingStorage(format!(
                "{} id capacity {} exhausted",
                self.id_type, self.max_id
            )));
        }
        state.high_id = id + 1;
        Ok(id)
    }

    /// Hands out `size` ids, preferring free ones.
    pub fn next_id_batch(&self, size: usize) -> Result<IdRange> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PenumbraError::IllegalState("id generator is closed"));
        }
        let mut range = IdRange::default();
        while range.reused.len() < size {
            match state.free.pop_first() {
                Some(id) => range.reused.push(id),
                None => break,
            }
        }
        let fresh = (size - range.reused.len()) as u64;
        if fresh == 0 {
            return Ok(range);
        }
        let mut start = state.high_id;
        if start <= INTEGER_MINUS_ONE && INTEGER_MINUS_ONE < start + fresh {
            // Ids below the reserved value go out as individual ids.
            while start < INTEGER_MINUS_ONE {
                range.reused.push(start);
                start += 1;
            }
            start = INTEGER_MINUS_ONE + 1;
        }
        let length = size as u64 - range.reused.len() as u64;
        if length > 0 && start + length - 1 > self.max_id {
            return Err(PenumbraError::UnderlyingStorage(format!(
                "{} id capacity {} exhausted",
                self.id_type, self.max_id
            )));
        }
        range.range_start = start;
        range.range_length = length;
        state.high_id = start + length;
        Ok(range)
    }

    /// Returns `id` to the free list. Ids at or beyond the high id are rejected.
    pub fn free_id(&self, id: u64) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PenumbraError::IllegalState("id generator is closed"));
        }
        if id == INTEGER_MINUS_ONE {
            return Ok(());
        }
        if id >= state.high_id {
            return Err(PenumbraError::Invalid("freed id is not below the high id"));
        }
        state.free.insert(id);
        trace!(id, id_type = %self.id_type, "idgen.free");
        Ok(())
    }

    /// Removes `id` from the free list if present.
    pub fn mark_used(&self, id: u64) {
        let mut state = self.state.lock();
        state.free.remove(&id);
        if id >= state.high_id {
            state.high_id = id + 1;
        }
    }

    /// One past the highest id handed out.
    pub fn high_id(&self) -> u64 {
        self.state.lock().high_id
    }

    /// Sets the high id, dropping free ids at or above it.
    pub fn set_high_id(&self, high_id: u64) {
        let mut state = self.state.lock();
        state.high_id = high_id;
        state.free.retain(|id| *id < high_id);
    }

    /// Raises the high id to `high_id` if it is currently lower.
    pub fn raise_high_id(&self, high_id: u64) -> bool {
        let mut state = self.state.lock();
        if high_id > state.high_id {
            state.high_id = high_id;
            true
        } else {
            false
        }
    }

    /// Highest id that may be in use, `None` when nothing was ever handed out.
    pub fn highest_possible_id_in_use(&self) -> Option<u64> {
        self.state.lock().high_id.checked_sub(1)
    }

    /// Number of ids below the high id that are not free.
    pub fn number_of_ids_in_use(&self) -> u64 {
        let state = self.state.lock();
        state.high_id - state.free.len() as u64
    }

    /// Number of ids waiting for reuse.
    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Persists the current state while keeping the file marked as open.
    pub fn checkpoint(&self) -> Result<()> {
        let state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        write_state(
            &self.path,
            MARKER_STICKY,
            state.high_id,
            state.free.iter().copied(),
        )
    }

    /// Persists the state and marks the file clean.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        write_state(
            &self.path,
            MARKER_CLEAN,
            state.high_id,
            state.free.iter().copied(),
        )?;
        state.closed = true;
        debug!(path = %self.path.display(), high_id = state.high_id, "idgen.close");
        Ok(())
    }

    /// Closes the generator without marking it clean and removes the id file.
    pub fn delete(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.closed = true;
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        debug!(path = %self.path.display(), "idgen.delete");
        Ok(())
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(arr)
}

fn write_state(
    path: &Path,
    marker: u8,
    high_id: u64,
    free: impl Iterator<Item = u64>,
) -> Result<()> {
    let mut buf = Vec::with_capacity(HEADER_LEN);
    buf.push(marker);
    buf.extend_from_slice(&high_id.to_be_bytes());
    for id in free {
        buf.extend_from_slice(&id.to_be_bytes());
    }
    let io = StdFileIo::open(path)?;
    io.truncate(0)?;
    io.write_at(0, &buf)?;
    io.sync_all()
}
