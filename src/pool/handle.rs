//! RAII guard for a borrowed backing-file handle.
//!
//! A [`PooledFile`] gives its holder exclusive use of one open file until it
//! is dropped, at which point the handle goes back to the pool (or is closed,
//! if it was a transient overflow handle or the entry was discarded meanwhile).

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use super::file_handle_pool::FileHandlePool;

/// Exclusive borrow of a pooled file handle.
///
/// # Example
/// ```ignore
/// let mut handle = pool.borrow(&path, true)?;
/// handle.write_at(window.offset, &bytes)?;
/// // handle drops here, returned to the pool
/// ```
pub struct PooledFile<'a> {
    /// Reference back to the pool for return on drop.
    pool: &'a FileHandlePool,
    /// Path of the backing file.
    path: PathBuf,
    /// Pool entry this handle belongs to; None for transient handles.
    entry_id: Option<u64>,
    /// The open file. Only None after the guard has been dropped.
    file: Option<File>,
}

impl<'a> PooledFile<'a> {
    /// Called by `FileHandlePool::borrow()`.
    pub(crate) fn new(
        pool: &'a FileHandlePool,
        path: PathBuf,
        entry_id: Option<u64>,
        file: File,
    ) -> Self {
        Self {
            pool,
            path,
            entry_id,
            file: Some(file),
        }
    }

    /// Path of the backing file.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this handle is closed on return instead of being pooled.
    #[inline]
    pub fn is_transient(&self) -> bool {
        self.entry_id.is_none()
    }

    /// Read exactly `buf.len()` bytes starting at `offset`.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;

        self.pool
            .stats()
            .bytes_read
            .fetch_add(buf.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Write all of `data` starting at `offset`, extending the file if needed.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;

        self.pool
            .stats()
            .bytes_written
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Give the handle back now instead of at end of scope.
    pub fn release(self) {
        drop(self);
    }

    fn file_mut(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "file handle already released"))
    }
}

impl Drop for PooledFile<'_> {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            self.pool.return_handle(&self.path, self.entry_id, file);
        }
    }
}
