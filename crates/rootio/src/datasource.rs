//! Memory-mapped or owned byte source for ROOT file reads.

use std::fmt;
use std::fs;
use std::ops::Deref;
use std::path::Path;

use crate::error::{Result, RootError};

/// Backing storage for a ROOT file.
///
/// `Mmap` serves files opened from disk; `Owned` serves `from_bytes()` and tests.
pub enum DataSource {
    /// File bytes owned in a `Vec<u8>`.
    Owned(Vec<u8>),
    /// Memory-mapped file.
    Mmap(memmap2::Mmap),
}

impl DataSource {
    /// Map the file at `path` read-only.
    pub fn map(path: &Path) -> Result<Self> {
        let file = fs::File::open(path).map_err(|source| RootError::FileIo {
            path: path.to_path_buf(),
            op: "open",
            source,
        })?;
        // SAFETY: the mapping is read-only. ROOT files are treated as immutable
        // for the lifetime of a reader; concurrent truncation by another
        // process is outside what this crate guards against.
        let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(|source| RootError::FileIo {
            path: path.to_path_buf(),
            op: "map",
            source,
        })?;
        Ok(DataSource::Mmap(mmap))
    }

    /// Bounds-checked view of `len` bytes starting at `seek`.
    pub fn range(&self, seek: u64, len: u64) -> Result<&[u8]> {
        let data: &[u8] = self;
        let start = usize::try_from(seek)
            .map_err(|_| RootError::Format(format!("seek offset too large: {}", seek)))?;
        let len = usize::try_from(len)
            .map_err(|_| RootError::Format(format!("range length too large: {}", len)))?;
        let end = start.checked_add(len).ok_or_else(|| {
            RootError::Format(format!("range overflow for seek={} len={}", seek, len))
        })?;
        if end > data.len() {
            return Err(RootError::BufferUnderflow {
                offset: start,
                need: len,
                have: data.len().saturating_sub(start),
            });
        }
        Ok(&data[start..end])
    }
}

impl Deref for DataSource {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        match self {
            DataSource::Owned(v) => v,
            DataSource::Mmap(m) => m,
        }
    }
}

impl AsRef<[u8]> for DataSource {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            DataSource::Owned(_) => "Owned",
            DataSource::Mmap(_) => "Mmap",
        };
        f.debug_struct("DataSource").field("kind", &kind).field("len", &self.len()).finish()
    }
}
