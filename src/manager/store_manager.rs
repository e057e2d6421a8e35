//! Page manager over the page cache and file store.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use log::debug;
use parking_lot::Mutex;

use crate::cache::{ManageablePage, PageCache, PageSerializer};
use crate::common::{PageId, Result, SessionId, StoreConfig};
use crate::manager::PageManager;
use crate::storage::SessionFileStore;

/// Pages touched by one in-flight request, keyed by (session, thread).
type RequestKey = (SessionId, ThreadId);

/// [`PageManager`] that keeps live pages in a [`PageCache`] and their bytes
/// in a [`SessionFileStore`].
///
/// A request is identified by its session and the thread serving it, so
/// two concurrent requests of one session never see each other's
/// uncommitted pages.
pub struct StorePageManager<P, S> {
    cache: PageCache<P, S>,
    touched: Mutex<HashMap<RequestKey, Vec<Arc<P>>>>,
}

impl<P, S> StorePageManager<P, S>
where
    P: ManageablePage,
    S: PageSerializer<P>,
{
    pub fn new(cache: PageCache<P, S>) -> Self {
        Self {
            cache,
            touched: Mutex::new(HashMap::new()),
        }
    }

    /// Open a file store from `config` and build the whole stack on it.
    pub fn open(config: StoreConfig, serializer: S) -> Result<Self> {
        let store = Arc::new(SessionFileStore::open(config)?);
        Ok(Self::new(PageCache::new(store, serializer)))
    }

    pub fn cache(&self) -> &PageCache<P, S> {
        &self.cache
    }

    /// Number of pages the current thread has touched in `session`.
    pub fn touched_count(&self, session: &SessionId) -> usize {
        self.touched
            .lock()
            .get(&request_key(session))
            .map_or(0, Vec::len)
    }
}

impl<P, S> PageManager<P> for StorePageManager<P, S>
where
    P: ManageablePage,
    S: PageSerializer<P>,
{
    fn get_page(&self, session: &SessionId, page_id: PageId) -> Result<Option<Arc<P>>> {
        let pending = self.touched.lock().get(&request_key(session)).and_then(|pages| {
            pages
                .iter()
                .find(|page| page.page_id() == page_id)
                .cloned()
        });
        if pending.is_some() {
            return Ok(pending);
        }

        Ok(self.cache.get_page(session, page_id))
    }

    fn touch_page(&self, session: &SessionId, page: Arc<P>) -> Result<()> {
        let mut touched = self.touched.lock();
        let pages = touched.entry(request_key(session)).or_default();

        match pages.iter_mut().find(|p| p.page_id() == page.page_id()) {
            Some(existing) => *existing = page,
            None => pages.push(page),
        }
        Ok(())
    }

    fn commit_request(&self, session: &SessionId) -> Result<()> {
        let pages = self.touched.lock().remove(&request_key(session));

        match pages {
            Some(pages) if !pages.is_empty() => self.cache.set_touched_pages(session, &pages),
            _ => Ok(()),
        }
    }

    fn new_session_created(&self, session: &SessionId) {
        // A recycled id must not inherit uncommitted pages.
        self.touched.lock().retain(|(sid, _), _| sid != session);
        debug!("{} created", session);
    }

    fn session_expired(&self, session: &SessionId) {
        self.touched.lock().retain(|(sid, _), _| sid != session);
        self.cache.remove_session(session);
        debug!("{} expired", session);
    }

    fn destroy(&self) {
        self.touched.lock().clear();
        self.cache.store().destroy();
    }
}

fn request_key(session: &SessionId) -> RequestKey {
    (session.clone(), thread::current().id())
}
