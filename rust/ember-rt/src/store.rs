//! Persistent storage for compiled pcode blobs.
//!
//! [`PcodeStore`] is the persistence boundary: it keeps opaque byte blobs
//! under numeric ids until they are explicitly deleted. It knows nothing
//! about the in-memory [`PcodeRepository`](crate::pcode::PcodeRepository)
//! and is not synchronized with it.
//!
//! [`MemoryStore`] keeps blobs in a map. [`FileStore`] writes one
//! `{id}.pcode` file per blob, atomically via write-to-tmp + rename.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

// ---------------------------------------------------------------------------
// BlobId
// ---------------------------------------------------------------------------

/// Identifier of a stored blob. An open store never hands out an id twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobId(pub u64);

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("blob not found: {0}")]
    NotFound(BlobId),
}

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

pub trait PcodeStore: Send + Sync {
    /// Store `data` and return its new id.
    fn persist(&self, data: &[u8]) -> Result<BlobId, StoreError>;
    /// Load the blob stored under `id`.
    fn retrieve(&self, id: BlobId) -> Result<Vec<u8>, StoreError>;
    /// Delete the blob stored under `id`.
    fn delete(&self, id: BlobId) -> Result<(), StoreError>;
    /// All live ids, ascending.
    fn list(&self) -> Result<Vec<BlobId>, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    blobs: HashMap<BlobId, Vec<u8>>,
    next_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PcodeStore for MemoryStore {
    fn persist(&self, data: &[u8]) -> Result<BlobId, StoreError> {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = BlobId(inner.next_id);
        inner.blobs.insert(id, data.to_vec());
        Ok(id)
    }

    fn retrieve(&self, id: BlobId) -> Result<Vec<u8>, StoreError> {
        self.inner
            .lock()
            .blobs
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    fn delete(&self, id: BlobId) -> Result<(), StoreError> {
        self.inner
            .lock()
            .blobs
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    fn list(&self) -> Result<Vec<BlobId>, StoreError> {
        let mut ids: Vec<BlobId> = self.inner.lock().blobs.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// Filesystem store
// ---------------------------------------------------------------------------

const ID_MARKER: &str = "next_id";

/// Stores blobs as `{id}.pcode` files in a directory.
///
/// The last id handed out is recorded in a `next_id` marker file, so ids
/// stay unique across reopen even after the newest blobs are deleted.
pub struct FileStore {
    dir: PathBuf,
    next_id: Mutex<u64>,
}

impl FileStore {
    /// Open (or create) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let marker = read_marker(&dir.join(ID_MARKER))?;
        let highest = scan_ids(&dir)?.into_iter().max().map_or(0, |id| id.0);
        let last = marker.max(highest);
        debug!(dir = %dir.display(), last, "opened pcode store");
        Ok(Self {
            dir,
            next_id: Mutex::new(last),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, id: BlobId) -> PathBuf {
        self.dir.join(format!("{}.pcode", id.0))
    }

    /// Write `data` to `path` through a sibling tmp file and rename.
    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), StoreError> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let written = fs::write(&tmp, data).and_then(|_| fs::rename(&tmp, path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

fn read_marker(path: &Path) -> Result<u64, StoreError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    text.trim().parse().map_err(|_| {
        StoreError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("corrupt id marker {}", path.display()),
        ))
    })
}

fn scan_ids(dir: &Path) -> Result<Vec<BlobId>, StoreError> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(stem) = name.strip_suffix(".pcode") {
            if let Ok(n) = stem.parse::<u64>() {
                ids.push(BlobId(n));
            }
        }
    }
    ids.sort();
    Ok(ids)
}

fn not_found_as(id: BlobId) -> impl FnOnce(io::Error) -> StoreError {
    move |e| match e.kind() {
        io::ErrorKind::NotFound => StoreError::NotFound(id),
        _ => StoreError::Io(e),
    }
}

impl PcodeStore for FileStore {
    fn persist(&self, data: &[u8]) -> Result<BlobId, StoreError> {
        // The marker is advanced before the blob is written; a failed write
        // burns the id instead of risking its reuse.
        let mut next = self.next_id.lock();
        let id = BlobId(*next + 1);
        self.write_atomic(&self.dir.join(ID_MARKER), id.0.to_string().as_bytes())?;
        *next = id.0;
        self.write_atomic(&self.blob_path(id), data)?;
        debug!(%id, size = data.len(), "persisted pcode blob");
        Ok(id)
    }

    fn retrieve(&self, id: BlobId) -> Result<Vec<u8>, StoreError> {
        fs::read(self.blob_path(id)).map_err(not_found_as(id))
    }

    fn delete(&self, id: BlobId) -> Result<(), StoreError> {
        fs::remove_file(self.blob_path(id)).map_err(not_found_as(id))?;
        debug!(%id, "deleted pcode blob");
        Ok(())
    }

    fn list(&self) -> Result<Vec<BlobId>, StoreError> {
        scan_ids(&self.dir)
    }
}

impl fmt::Debug for FileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStore").field("dir", &self.dir).finish()
    }
}
