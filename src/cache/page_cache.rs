//! Page Cache - request-scoped live pages in front of the file store.
//!
//! Deserializing a page is expensive, so each session keeps the pages its
//! last request touched. Pages carried over in serialized form (for example
//! after the HTTP session itself was replicated or passivated) sit in the
//! cache as raw bytes until someone asks for them.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::cache::{ManageablePage, PageSerializer};
use crate::common::{PageId, Result, SessionId};
use crate::storage::SessionFileStore;

/// One cached page, converted lazily on first access.
pub enum CachedPage<P> {
    /// Serialized bytes not yet turned into a page.
    Raw(Vec<u8>),
    /// A live page.
    Materialized(Arc<P>),
}

impl<P> CachedPage<P> {
    pub fn is_materialized(&self) -> bool {
        matches!(self, CachedPage::Materialized(_))
    }

    /// Return the live page, deserializing in place if still raw.
    fn materialize<S: PageSerializer<P>>(&mut self, serializer: &S) -> Result<Arc<P>> {
        match self {
            CachedPage::Materialized(page) => Ok(Arc::clone(page)),
            CachedPage::Raw(bytes) => {
                let page = Arc::new(serializer.deserialize(bytes)?);
                *self = CachedPage::Materialized(Arc::clone(&page));
                Ok(page)
            }
        }
    }
}

/// Cached pages of one session, in touch order.
struct SessionPages<P> {
    entries: Vec<(PageId, CachedPage<P>)>,
}

impl<P> SessionPages<P> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn position(&self, page_id: PageId) -> Option<usize> {
        self.entries.iter().position(|(id, _)| *id == page_id)
    }
}

type SharedSessionPages<P> = Arc<Mutex<SessionPages<P>>>;

/// Request-scoped object cache over a [`SessionFileStore`].
///
/// The cache owns a handle to its store and its serializer; nothing is
/// looked up through process-wide state.
///
/// # Thread Safety
/// The session map is behind one `Mutex`; each session's page list has its
/// own, so sessions never wait on each other during deserialization.
pub struct PageCache<P, S> {
    store: Arc<SessionFileStore>,
    serializer: S,
    sessions: Mutex<HashMap<SessionId, SharedSessionPages<P>>>,
}

impl<P, S> PageCache<P, S>
where
    P: ManageablePage,
    S: PageSerializer<P>,
{
    pub fn new(store: Arc<SessionFileStore>, serializer: S) -> Self {
        Self {
            store,
            serializer,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// The live page, from the cache or else from the file store.
    ///
    /// Pages that fail to deserialize are logged and reported absent.
    pub fn get_page(&self, session: &SessionId, page_id: PageId) -> Option<Arc<P>> {
        if let Some(pages) = self.session_pages(session) {
            let mut pages = pages.lock();
            if let Some(pos) = pages.position(page_id) {
                match pages.entries[pos].1.materialize(&self.serializer) {
                    Ok(page) => return Some(page),
                    Err(e) => {
                        warn!("dropping cached {} of {}: {}", page_id, session, e);
                        pages.entries.remove(pos);
                    }
                }
            }
        }

        let bytes = self.store.get(session, page_id)?;
        let page = match self.serializer.deserialize(&bytes) {
            Ok(page) => Arc::new(page),
            Err(e) => {
                warn!("cannot deserialize {} of {}: {}", page_id, session, e);
                return None;
            }
        };

        let pages = self.session_pages_or_create(session);
        let mut pages = pages.lock();
        if pages.position(page_id).is_none() {
            pages
                .entries
                .push((page_id, CachedPage::Materialized(Arc::clone(&page))));
        }
        Some(page)
    }

    /// Replace the session's cache with the pages touched this request and
    /// write each of them to the file store.
    ///
    /// Every page is attempted even if an earlier one fails.
    ///
    /// # Errors
    /// Returns the first serialization or allocation error encountered.
    pub fn set_touched_pages(&self, session: &SessionId, touched: &[Arc<P>]) -> Result<()> {
        {
            let pages = self.session_pages_or_create(session);
            let mut pages = pages.lock();
            pages.entries = touched
                .iter()
                .map(|page| (page.page_id(), CachedPage::Materialized(Arc::clone(page))))
                .collect();
        }

        let mut first_error = None;
        for page in touched {
            let result = self
                .serializer
                .serialize(page)
                .and_then(|bytes| self.store.put(session, page.page_id(), &bytes));
            if let Err(e) = result {
                warn!("cannot store {} of {}: {}", page.page_id(), session, e);
                first_error.get_or_insert(e);
            }
        }
        debug!("stored {} touched page(s) for {}", touched.len(), session);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Serialized form of the session's cache, for carrying it inside the
    /// HTTP session between requests.
    pub fn snapshot_session(&self, session: &SessionId) -> Vec<(PageId, Vec<u8>)> {
        let Some(pages) = self.session_pages(session) else {
            return Vec::new();
        };
        let pages = pages.lock();

        pages
            .entries
            .iter()
            .filter_map(|(id, cached)| match cached {
                CachedPage::Raw(bytes) => Some((*id, bytes.clone())),
                CachedPage::Materialized(page) => match self.serializer.serialize(page) {
                    Ok(bytes) => Some((*id, bytes)),
                    Err(e) => {
                        warn!("leaving {} of {} out of snapshot: {}", id, session, e);
                        None
                    }
                },
            })
            .collect()
    }

    /// Replace the session's cache with raw pages from a snapshot.
    ///
    /// Nothing is deserialized until `get_page` asks for it.
    pub fn restore_session(&self, session: &SessionId, snapshot: Vec<(PageId, Vec<u8>)>) {
        let pages = self.session_pages_or_create(session);
        pages.lock().entries = snapshot
            .into_iter()
            .map(|(id, bytes)| (id, CachedPage::Raw(bytes)))
            .collect();
    }

    /// Drop a page from the cache and the file store.
    pub fn remove_page(&self, session: &SessionId, page_id: PageId) {
        if let Some(pages) = self.session_pages(session) {
            let mut pages = pages.lock();
            if let Some(pos) = pages.position(page_id) {
                pages.entries.remove(pos);
            }
        }
        self.store.remove(session, page_id);
    }

    /// Drop a session's cache and unbind it from the file store.
    pub fn remove_session(&self, session: &SessionId) {
        self.sessions.lock().remove(session);
        self.store.unbind(session);
    }

    /// Write the store's session index.
    pub fn save_index(&self) -> Result<()> {
        self.store.save_index()
    }

    /// Adopt sessions from an index left by a previous run.
    ///
    /// The store already does this when opened; calling it again only
    /// picks up an index written since.
    pub fn load_index(&self) -> usize {
        self.store.load_index()
    }

    /// Whether the page is cached and already deserialized.
    pub fn is_materialized(&self, session: &SessionId, page_id: PageId) -> bool {
        self.session_pages(session).is_some_and(|pages| {
            let pages = pages.lock();
            pages
                .position(page_id)
                .is_some_and(|pos| pages.entries[pos].1.is_materialized())
        })
    }

    /// Number of pages cached for a session.
    pub fn cached_count(&self, session: &SessionId) -> usize {
        self.session_pages(session)
            .map_or(0, |pages| pages.lock().entries.len())
    }

    /// The backing file store.
    pub fn store(&self) -> &Arc<SessionFileStore> {
        &self.store
    }

    fn session_pages(&self, session: &SessionId) -> Option<SharedSessionPages<P>> {
        self.sessions.lock().get(session).cloned()
    }

    fn session_pages_or_create(&self, session: &SessionId) -> SharedSessionPages<P> {
        Arc::clone(
            self.sessions
                .lock()
                .entry(session.clone())
                .or_insert_with(|| Arc::new(Mutex::new(SessionPages::new()))),
        )
    }
}
