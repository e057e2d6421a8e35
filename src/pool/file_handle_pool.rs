//! File Handle Pool - bounded set of open backing files shared by all sessions.
//!
//! The [`FileHandlePool`] provides:
//! - Lazy opening of session data files
//! - Exclusive borrowing through [`PooledFile`] guards
//! - LRU closing of idle handles when capacity is reached

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use log::{debug, trace};
use parking_lot::Mutex;

use crate::common::{Error, Result};
use crate::pool::replacer::LruReplacer;
use crate::pool::{PoolStats, PooledFile};

/// One open file tracked by the pool.
struct PoolEntry {
    /// Generation id, so a stale guard never returns into a newer entry.
    id: u64,
    /// The idle handle; None while borrowed.
    file: Option<File>,
    /// Whether the handle was opened for writing.
    writable: bool,
}

struct PoolState {
    /// Open handles by path, borrowed or idle.
    entries: HashMap<PathBuf, PoolEntry>,

    /// Eviction order of idle handles.
    replacer: LruReplacer<PathBuf>,

    /// Source of entry generation ids.
    next_id: u64,

    /// Set by `destroy()`; no further borrows are served.
    destroyed: bool,
}

/// Bounded pool of open backing-file handles.
///
/// # Architecture
/// ```text
/// ┌──────────────────────────────────────────────────────────┐
/// │                    FileHandlePool                        │
/// │  ┌──────────────────────┐   ┌─────────────────────────┐  │
/// │  │ entries              │   │ replacer                │  │
/// │  │ PathBuf → PoolEntry  │──▶│ LruReplacer<PathBuf>    │  │
/// │  │ (idle File | lent)   │   │ (idle entries only)     │  │
/// │  └──────────────────────┘   └─────────────────────────┘  │
/// │           one Mutex guards both; I/O happens outside     │
/// └──────────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// Opening, evicting and returning handles happen under a single short
/// critical section. Reads and writes go through the borrowed
/// [`PooledFile`] after the lock is released, so sessions holding
/// different handles do I/O concurrently.
///
/// When every pooled handle is lent out and capacity is reached, and also
/// when a file is borrowed a second time while its handle is lent, the pool
/// opens a transient handle that is closed on return instead of blocking.
pub struct FileHandlePool {
    state: Mutex<PoolState>,

    /// Performance statistics.
    stats: PoolStats,

    /// Maximum number of pooled handles (immutable after construction).
    capacity: usize,
}

impl FileHandlePool {
    /// Create an empty pool.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");

        Self {
            state: Mutex::new(PoolState {
                entries: HashMap::new(),
                replacer: LruReplacer::new(),
                next_id: 0,
                destroyed: false,
            }),
            stats: PoolStats::new(),
            capacity,
        }
    }

    /// Borrow exclusive use of the handle for `path`.
    ///
    /// With `for_write` the file is created if missing; otherwise a missing
    /// file is an error.
    ///
    /// # Errors
    /// - `Error::PoolDestroyed` after `destroy()`
    /// - `Error::Io` if the file cannot be opened
    pub fn borrow(&self, path: &Path, for_write: bool) -> Result<PooledFile<'_>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.destroyed {
            return Err(Error::PoolDestroyed);
        }

        if let Some(entry) = state.entries.get_mut(path) {
            match entry.file.take() {
                Some(file) if entry.writable || !for_write => {
                    state.replacer.record_access(&path.to_path_buf());
                    state.replacer.set_evictable(&path.to_path_buf(), false);
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);

                    return Ok(PooledFile::new(self, path.to_path_buf(), Some(entry.id), file));
                }
                Some(read_only) => {
                    // Upgrade in place; the slot is reused, no eviction needed.
                    drop(read_only);
                    let file = match open_file(path, true) {
                        Ok(file) => file,
                        Err(e) => {
                            state.entries.remove(path);
                            state.replacer.remove(&path.to_path_buf());
                            return Err(e);
                        }
                    };
                    entry.writable = true;
                    state.replacer.record_access(&path.to_path_buf());
                    state.replacer.set_evictable(&path.to_path_buf(), false);
                    self.stats.opens.fetch_add(1, Ordering::Relaxed);

                    return Ok(PooledFile::new(self, path.to_path_buf(), Some(entry.id), file));
                }
                None => {
                    drop(guard);
                    return self.borrow_transient(path, for_write);
                }
            }
        }

        if state.entries.len() >= self.capacity {
            match state.replacer.evict() {
                Some(victim) => {
                    state.entries.remove(&victim);
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                    trace!("closed idle handle {}", victim.display());
                }
                None => {
                    drop(guard);
                    return self.borrow_transient(path, for_write);
                }
            }
        }

        let file = open_file(path, for_write)?;
        let id = state.next_id;
        state.next_id += 1;
        state.entries.insert(
            path.to_path_buf(),
            PoolEntry {
                id,
                file: None,
                writable: for_write,
            },
        );
        state.replacer.record_access(&path.to_path_buf());
        state.replacer.set_evictable(&path.to_path_buf(), false);
        self.stats.opens.fetch_add(1, Ordering::Relaxed);

        Ok(PooledFile::new(self, path.to_path_buf(), Some(id), file))
    }

    /// Forcibly close the handle for `path` and drop it from the pool.
    ///
    /// A guard still lent out for this path closes its file on return.
    /// The file itself is left on disk; removing it is the caller's job.
    pub fn close_and_delete(&self, path: &Path) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.entries.remove(path).is_some() {
            state.replacer.remove(&path.to_path_buf());
            debug!("closed handle {}", path.display());
        }
    }

    /// Close every handle and refuse further borrows.
    pub fn destroy(&self) {
        let mut state = self.state.lock();
        state.destroyed = true;
        state.entries.clear();
        state.replacer = LruReplacer::new();
        debug!("file handle pool destroyed");
    }

    /// Get pool statistics.
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Get the pool capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of pooled handles currently open, idle or lent.
    pub fn open_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether a pooled handle for `path` is currently open.
    pub fn is_open(&self, path: &Path) -> bool {
        self.state.lock().entries.contains_key(path)
    }

    // ========================================================================
    // Internal: Called by PooledFile on drop
    // ========================================================================

    pub(crate) fn return_handle(&self, path: &Path, entry_id: Option<u64>, file: File) {
        let Some(id) = entry_id else {
            return; // transient: closed by dropping `file`
        };

        let mut guard = self.state.lock();
        let state = &mut *guard;

        match state.entries.get_mut(path) {
            Some(entry) if entry.id == id && entry.file.is_none() => {
                entry.file = Some(file);
                state.replacer.set_evictable(&path.to_path_buf(), true);
            }
            // Entry discarded (or replaced) while lent; just close.
            _ => {}
        }
    }

    fn borrow_transient(&self, path: &Path, for_write: bool) -> Result<PooledFile<'_>> {
        let file = open_file(path, for_write)?;
        self.stats.overflow_opens.fetch_add(1, Ordering::Relaxed);
        trace!("transient handle for {}", path.display());

        Ok(PooledFile::new(self, path.to_path_buf(), None, file))
    }
}

fn open_file(path: &Path, for_write: bool) -> Result<File> {
    let file = if for_write {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?
    } else {
        OpenOptions::new().read(true).open(path)?
    };
    Ok(file)
}
