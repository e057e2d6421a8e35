//! Session File Store - byte-level page storage, one bounded file per session.
//!
//! The [`SessionFileStore`] ties together:
//! - One [`WindowAllocator`] per session (where do the bytes go)
//! - The shared [`FileHandlePool`] (how do we reach the file)
//! - A [`SerializedPageCache`] of recently stored pages (what we can skip reading)
//! - The index snapshot (what survives an orderly restart)

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, info, trace, warn};
use parking_lot::{Mutex, RwLock};

use crate::common::config::{INDEX_FILE_NAME, SESSION_DATA_FILE_NAME};
use crate::common::{PageId, Result, SessionId, StoreConfig};
use crate::pool::{FileHandlePool, PoolStats};
use crate::storage::index::{SessionIndexEntry, StoreIndex};
use crate::storage::{SerializedPageCache, Window, WindowAllocator};

/// Per-session state, guarded by the session's own monitor.
#[derive(Default)]
struct SessionState {
    /// Absolute path of the session data file, set on first write.
    data_file: Option<PathBuf>,

    /// Window map, set on first write.
    allocator: Option<WindowAllocator>,

    /// Set by `unbind`; the entry never does anything again.
    unbound: bool,
}

struct SessionEntry {
    state: Mutex<SessionState>,
}

impl SessionEntry {
    fn new(state: SessionState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }
}

/// Durable page bytes for all sessions of one application.
///
/// # On-disk layout
/// ```text
/// <store_root>/<app_name>-filestore/
/// ├── PageStoreIndex                  (only between shutdown and next startup)
/// ├── <low>/<high>/<session-a>/data   (ring of page windows, ≤ max_size_per_session)
/// └── <low>/<high>/<session-b>/data
/// ```
///
/// `<low>/<high>/<session>` comes from [`SessionId::folder_path`]. Each
/// session directory is claimed by exactly one live session; if two ids ever
/// land on the same name the later one gets a numbered sibling.
///
/// # Thread Safety
/// - `sessions` (`RwLock`): lookups dominate, inserts once per session
/// - each session (`Mutex`): serializes all reads and writes of one file
/// - `pool`: its own short internal lock; I/O happens on borrowed handles
/// - `claimed`, `serialized`: short locks, taken after a session's monitor
///
/// Different sessions never contend except on the map and pool locks.
///
/// # Failure model
/// The store is a cache, not a system of record. Read and write failures
/// are logged and surface as "page absent"; the only errors returned are
/// allocation rejections such as `Error::OversizedPage`.
pub struct SessionFileStore {
    config: StoreConfig,

    /// `<store_root>/<app_name>-filestore`.
    folder: PathBuf,

    pool: FileHandlePool,

    sessions: RwLock<HashMap<SessionId, Arc<SessionEntry>>>,

    /// Session directory -> the session that owns it.
    claimed: Mutex<HashMap<PathBuf, SessionId>>,

    serialized: SerializedPageCache,

    /// Windows overwritten by ring wrap-around.
    window_evictions: AtomicU64,

    destroyed: AtomicBool,
}

impl SessionFileStore {
    /// Open (or create) the store described by `config`.
    ///
    /// An index left by a previous orderly shutdown is adopted and deleted.
    ///
    /// # Errors
    /// - `Error::InvalidConfig` if the config does not validate
    /// - `Error::Io` if the store folder cannot be created
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;

        let folder = config.store_folder();
        fs::create_dir_all(&folder)?;

        let store = Self {
            pool: FileHandlePool::new(config.file_pool_capacity),
            serialized: SerializedPageCache::new(config.serialized_cache_size),
            claimed: Mutex::new(HashMap::new()),
            folder,
            config,
            sessions: RwLock::new(HashMap::new()),
            window_evictions: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
        };
        store.load_index();
        Ok(store)
    }

    // ========================================================================
    // Public API: page data
    // ========================================================================

    /// Bytes last stored for a page, or None if unknown, evicted or unreadable.
    pub fn get(&self, session: &SessionId, page_id: PageId) -> Option<Vec<u8>> {
        if self.is_destroyed() {
            return None;
        }
        if let Some(bytes) = self.serialized.get(session, page_id) {
            trace!("{} of {} served from memory", page_id, session);
            return Some(bytes);
        }

        let entry = self.entry(session)?;
        let state = entry.state.lock();
        if state.unbound {
            return None;
        }

        let window = state.allocator.as_ref()?.lookup(page_id)?;
        let path = state.data_file.as_deref()?;

        match self.read_window(path, &window) {
            Ok(bytes) => {
                debug!("returning {} bytes for {} in {}", bytes.len(), page_id, session);
                Some(bytes)
            }
            Err(e) => {
                warn!("cannot read {} of {} from {}: {}", page_id, session, path.display(), e);
                None
            }
        }
    }

    /// Store the serialized form of a page.
    ///
    /// Empty data is ignored. Older pages of the session may be evicted to
    /// make room. A failed write is logged and leaves the page absent.
    ///
    /// # Errors
    /// Returns `Error::OversizedPage` if `data` exceeds the per-session
    /// budget. Any older version of the page is dropped in that case too.
    pub fn put(&self, session: &SessionId, page_id: PageId, data: &[u8]) -> Result<()> {
        if data.is_empty() || self.is_destroyed() {
            return Ok(());
        }

        let entry = self.entry_or_create(session);
        let mut guard = entry.state.lock();
        let state = &mut *guard;
        if state.unbound {
            trace!("ignoring store of {} for unbound {}", page_id, session);
            return Ok(());
        }

        let path = match state.data_file.clone() {
            Some(path) => path,
            None => {
                let dir = self.claim_folder(session);
                if let Err(e) = fs::create_dir_all(&dir) {
                    warn!("cannot create {} for {}: {}", dir.display(), session, e);
                    return Ok(());
                }
                let path = dir.join(SESSION_DATA_FILE_NAME);
                state.data_file = Some(path.clone());
                path
            }
        };
        let allocator = state
            .allocator
            .get_or_insert_with(|| WindowAllocator::new(self.config.max_size_per_session));

        let (window, evicted) = match allocator.allocate(page_id, data.len() as u64) {
            Ok(placed) => placed,
            Err(e) => {
                allocator.free(page_id);
                self.serialized.remove(session, page_id);
                return Err(e);
            }
        };
        for lost in &evicted {
            self.serialized.remove(session, lost.page_id);
        }
        if !evicted.is_empty() {
            self.window_evictions
                .fetch_add(evicted.len() as u64, Ordering::Relaxed);
            trace!("{} evicted {} window(s) in {}", page_id, evicted.len(), session);
        }

        debug!("storing {} bytes for {} in {}", data.len(), page_id, session);
        match self.write_window(&path, &window, data) {
            Ok(()) => self.serialized.store(session, page_id, data),
            Err(e) => {
                warn!("cannot write {} of {} to {}: {}", page_id, session, path.display(), e);
                allocator.free(page_id);
                self.serialized.remove(session, page_id);
            }
        }
        Ok(())
    }

    /// Forget one page. Its bytes are reclaimed by later wrap-around.
    pub fn remove(&self, session: &SessionId, page_id: PageId) {
        self.serialized.remove(session, page_id);
        let Some(entry) = self.entry(session) else {
            return;
        };
        let mut state = entry.state.lock();
        if state.unbound {
            return;
        }
        if let Some(allocator) = state.allocator.as_mut() {
            if allocator.free(page_id).is_some() {
                debug!("removed {} from {}", page_id, session);
            }
        }
    }

    /// Drop everything stored for a session and delete its directory.
    ///
    /// Later calls for the same session id do nothing. The session keeps a
    /// tombstone entry for the life of the store, including ids that never
    /// stored anything, so memory grows with the number of distinct ids
    /// unbound.
    pub fn unbind(&self, session: &SessionId) {
        let entry = Arc::clone(
            self.sessions
                .write()
                .entry(session.clone())
                .or_insert_with(|| SessionEntry::new(SessionState::default())),
        );

        let mut state = entry.state.lock();
        if state.unbound {
            return;
        }
        state.unbound = true;
        state.allocator = None;
        self.serialized.remove_session(session);

        let dir = match state.data_file.take() {
            Some(path) => {
                self.pool.close_and_delete(&path);
                path.parent().map(Path::to_path_buf)
            }
            // Nothing written by this store, but a run that ended without
            // an index may have left the folder behind.
            None => {
                let base = self.folder.join(session.folder_path());
                (!self.claimed.lock().contains_key(&base)).then_some(base)
            }
        };
        let Some(dir) = dir else {
            debug!("unbound {}", session);
            return;
        };

        self.remove_session_dir(session, &dir);
        let mut claimed = self.claimed.lock();
        if claimed.get(&dir) == Some(session) {
            claimed.remove(&dir);
        }
    }

    /// Whether a live window exists for the page.
    pub fn contains(&self, session: &SessionId, page_id: PageId) -> bool {
        self.entry(session).is_some_and(|entry| {
            let state = entry.state.lock();
            !state.unbound
                && state
                    .allocator
                    .as_ref()
                    .is_some_and(|a| a.lookup(page_id).is_some())
        })
    }

    /// Live bytes held for a session, or None if it has stored nothing.
    pub fn session_size(&self, session: &SessionId) -> Option<u64> {
        let entry = self.entry(session)?;
        let state = entry.state.lock();
        if state.unbound {
            return None;
        }
        state.allocator.as_ref().map(WindowAllocator::live_bytes)
    }

    /// Sessions currently holding data, sorted.
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, entry)| {
                let state = entry.state.lock();
                !state.unbound && state.allocator.is_some()
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    // ========================================================================
    // Public API: lifecycle and info
    // ========================================================================

    /// Orderly shutdown: write the index and close every file handle.
    ///
    /// The store ignores all further calls.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("destroying store at {}", self.folder.display());

        if let Err(e) = self.save_index() {
            error!("cannot write index to {}: {}", self.index_path().display(), e);
        }
        self.pool.destroy();
        self.serialized.clear();
        self.sessions.write().clear();
        self.claimed.lock().clear();
        debug!("store destroyed");
    }

    /// Write the session index snapshot.
    ///
    /// Called by `destroy`; exposed for embedders with their own shutdown hooks.
    pub fn save_index(&self) -> Result<()> {
        let mut index = StoreIndex::new();

        for (id, entry) in self.sessions.read().iter() {
            let state = entry.state.lock();
            if state.unbound {
                continue;
            }
            let (Some(path), Some(allocator)) = (&state.data_file, &state.allocator) else {
                continue;
            };
            let Ok(file_name) = path.strip_prefix(&self.folder) else {
                continue;
            };
            index.sessions.insert(
                id.as_str().to_string(),
                SessionIndexEntry {
                    file_name: file_name.to_path_buf(),
                    allocator: allocator.snapshot(),
                },
            );
        }

        index.write_to(&self.index_path())?;
        info!("saved index with {} session(s)", index.sessions.len());
        Ok(())
    }

    /// Adopt sessions from a previous run's index, then delete it.
    ///
    /// Sessions already known to this store are left alone. Returns the
    /// number of sessions adopted; a missing or corrupt index adopts none.
    pub fn load_index(&self) -> usize {
        let path = self.index_path();
        let index = match StoreIndex::take_from(&path) {
            Ok(Some(index)) => index,
            Ok(None) => return 0,
            Err(e) => {
                warn!("discarding index {}: {}", path.display(), e);
                return 0;
            }
        };

        let mut adopted = 0;
        let mut sessions = self.sessions.write();
        for (id, entry) in index.sessions {
            let session = SessionId::new(id);
            if sessions.contains_key(&session) {
                continue;
            }

            let data_file = self.folder.join(&entry.file_name);
            if !self.is_inside_store(&data_file) || !data_file.is_file() {
                warn!("index entry for {} has no data file, skipping", session);
                continue;
            }
            let Some(dir) = data_file.parent().map(Path::to_path_buf) else {
                continue;
            };
            if !self.is_inside_store(&dir) {
                warn!("index entry for {} points at the store root, skipping", session);
                continue;
            }
            if entry.allocator.max_bytes != self.config.max_size_per_session {
                warn!(
                    "index entry for {} was written for {} bytes per session, skipping",
                    session, entry.allocator.max_bytes
                );
                continue;
            }
            let allocator = match WindowAllocator::restore(&entry.allocator) {
                Ok(allocator) => allocator,
                Err(e) => {
                    warn!("index entry for {} rejected: {}", session, e);
                    continue;
                }
            };

            {
                let mut claimed = self.claimed.lock();
                if let Some(owner) = claimed.get(&dir) {
                    warn!("index entry for {} reuses the folder of {}, skipping", session, owner);
                    continue;
                }
                claimed.insert(dir, session.clone());
            }

            sessions.insert(
                session,
                SessionEntry::new(SessionState {
                    data_file: Some(data_file),
                    allocator: Some(allocator),
                    unbound: false,
                }),
            );
            adopted += 1;
        }
        info!("adopted {} session(s) from index", adopted);
        adopted
    }

    /// The store's configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// `<store_root>/<app_name>-filestore`.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Directory holding a session's data file.
    ///
    /// For a session that has not stored anything yet this is the directory
    /// it would normally claim.
    pub fn session_folder(&self, session: &SessionId) -> PathBuf {
        let claimed = self.entry(session).and_then(|entry| {
            let state = entry.state.lock();
            let dir = state
                .data_file
                .as_deref()
                .and_then(Path::parent)
                .map(Path::to_path_buf);
            dir
        });
        claimed.unwrap_or_else(|| self.folder.join(session.folder_path()))
    }

    /// In-memory cache of recently stored pages.
    pub fn serialized_cache(&self) -> &SerializedPageCache {
        &self.serialized
    }

    /// File handle pool statistics.
    pub fn pool_stats(&self) -> &PoolStats {
        self.pool.stats()
    }

    /// Number of windows lost to wrap-around since startup.
    pub fn window_evictions(&self) -> u64 {
        self.window_evictions.load(Ordering::Relaxed)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn entry(&self, session: &SessionId) -> Option<Arc<SessionEntry>> {
        self.sessions.read().get(session).cloned()
    }

    fn entry_or_create(&self, session: &SessionId) -> Arc<SessionEntry> {
        if let Some(entry) = self.entry(session) {
            return entry;
        }
        Arc::clone(
            self.sessions
                .write()
                .entry(session.clone())
                .or_insert_with(|| SessionEntry::new(SessionState::default())),
        )
    }

    fn read_window(&self, path: &Path, window: &Window) -> Result<Vec<u8>> {
        let mut handle = self.pool.borrow(path, false)?;
        let mut buf = vec![0u8; window.length as usize];
        handle.read_at(window.offset, &mut buf)?;
        Ok(buf)
    }

    fn write_window(&self, path: &Path, window: &Window, data: &[u8]) -> Result<()> {
        let mut handle = self.pool.borrow(path, true)?;
        handle.write_at(window.offset, data)?;
        Ok(())
    }

    fn index_path(&self) -> PathBuf {
        self.folder.join(INDEX_FILE_NAME)
    }

    /// Reserve a directory for the session's data file.
    ///
    /// Normally `folder_path()`; a numbered sibling if another live session
    /// already owns that name.
    fn claim_folder(&self, session: &SessionId) -> PathBuf {
        let base = self.folder.join(session.folder_path());
        let mut claimed = self.claimed.lock();

        let mut candidate = base.clone();
        let mut attempt = 0u32;
        loop {
            match claimed.get(&candidate) {
                None => {
                    claimed.insert(candidate.clone(), session.clone());
                    return candidate;
                }
                Some(owner) if owner == session => return candidate,
                Some(owner) => {
                    attempt += 1;
                    warn!("{} collides with {} on {}", session, owner, candidate.display());
                    candidate = base.with_file_name(format!("{}.{}", session.folder_name(), attempt));
                }
            }
        }
    }

    /// Whether `path` lies strictly below the store folder without any
    /// `.`/`..` detours.
    fn is_inside_store(&self, path: &Path) -> bool {
        path.strip_prefix(&self.folder).is_ok_and(|rel| {
            rel.components().next().is_some()
                && rel.components().all(|c| matches!(c, Component::Normal(_)))
        })
    }

    /// Delete a session directory, then its hash-level parents if empty.
    fn remove_session_dir(&self, session: &SessionId, dir: &Path) {
        if !self.is_inside_store(dir) {
            warn!("refusing to remove {} for {}: outside the store", dir.display(), session);
            return;
        }

        match fs::remove_dir_all(dir) {
            Ok(()) => debug!("unbound {}, removed {}", session, dir.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => debug!("unbound {}", session),
            Err(e) => warn!("cannot remove {} for {}: {}", dir.display(), session, e),
        }

        let mut parent = dir.parent();
        while let Some(level) = parent.filter(|p| self.is_inside_store(p)) {
            if fs::remove_dir(level).is_err() {
                break;
            }
            parent = level.parent();
        }
    }
}

impl Drop for SessionFileStore {
    fn drop(&mut self) {
        self.destroy();
    }
}
