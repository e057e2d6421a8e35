//! Page manager decorator that serializes access to pages across threads.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;

use crate::cache::{ManageablePage, PageSerializer};
use crate::common::{PageId, Result, SessionId, StoreConfig};
use crate::lock::PageLockManager;
use crate::manager::{PageManager, StorePageManager};

/// Releases the current thread's page locks when dropped, so a failing or
/// panicking commit never leaks a lock past the end of the request.
struct UnlockOnDrop(Arc<PageLockManager>);

impl Drop for UnlockOnDrop {
    fn drop(&mut self) {
        self.0.unlock_all_pages();
    }
}

/// Wraps a [`PageManager`] so that every page a request reads or touches
/// is locked to the request's thread until `commit_request`.
///
/// Page ids are only unique within a session, so each session gets its own
/// [`PageLockManager`]. A request remembers the lock manager it locked
/// through, so `commit_request` releases the right locks even if the session
/// expired in the meantime.
///
/// # Example
/// ```ignore
/// let manager = LockingPageManager::open(config, serializer)?;
///
/// let page = manager.get_page(&session, page_id)?;   // locks page_id
/// manager.touch_page(&session, updated)?;
/// manager.commit_request(&session)?;                  // stores, then unlocks
/// ```
pub struct LockingPageManager<P, M> {
    inner: M,
    timeout: Duration,
    locks: Mutex<HashMap<SessionId, Arc<PageLockManager>>>,
    /// Lock manager each in-flight request has locked pages through.
    held: Mutex<HashMap<(SessionId, ThreadId), Arc<PageLockManager>>>,
    _page: PhantomData<fn() -> P>,
}

impl<P, S> LockingPageManager<P, StorePageManager<P, S>>
where
    P: ManageablePage,
    S: PageSerializer<P>,
{
    /// Build the full stack from `config`, locking with `config.lock_timeout`.
    pub fn open(config: StoreConfig, serializer: S) -> Result<Self> {
        let timeout = config.lock_timeout;
        Ok(Self::new(StorePageManager::open(config, serializer)?, timeout))
    }
}

impl<P, M> LockingPageManager<P, M>
where
    P: ManageablePage,
    M: PageManager<P>,
{
    /// Wrap `inner`, waiting at most `timeout` for each page lock.
    ///
    /// Prefer [`LockingPageManager::open`], which takes the timeout from the
    /// store configuration.
    pub fn new(inner: M, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            locks: Mutex::new(HashMap::new()),
            held: Mutex::new(HashMap::new()),
            _page: PhantomData,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of sessions with a live lock manager.
    pub fn session_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// The wrapped manager.
    pub fn inner(&self) -> &M {
        &self.inner
    }

    /// Lock manager for a session, created on first use.
    pub fn lock_manager(&self, session: &SessionId) -> Arc<PageLockManager> {
        Arc::clone(
            self.locks
                .lock()
                .entry(session.clone())
                .or_insert_with(|| Arc::new(PageLockManager::new(self.timeout))),
        )
    }

    /// Lock manager the current request locks through, remembered until
    /// its `commit_request`.
    fn request_locks(&self, session: &SessionId) -> Arc<PageLockManager> {
        let key = (session.clone(), thread::current().id());
        if let Some(locks) = self.held.lock().get(&key) {
            return Arc::clone(locks);
        }

        let locks = self.lock_manager(session);
        self.held.lock().insert(key, Arc::clone(&locks));
        locks
    }
}

impl<P, M> PageManager<P> for LockingPageManager<P, M>
where
    P: ManageablePage,
    M: PageManager<P>,
{
    fn get_page(&self, session: &SessionId, page_id: PageId) -> Result<Option<Arc<P>>> {
        self.request_locks(session).lock_page(page_id)?;
        self.inner.get_page(session, page_id)
    }

    fn touch_page(&self, session: &SessionId, page: Arc<P>) -> Result<()> {
        self.request_locks(session).lock_page(page.page_id())?;
        self.inner.touch_page(session, page)
    }

    fn commit_request(&self, session: &SessionId) -> Result<()> {
        let captured = self
            .held
            .lock()
            .remove(&(session.clone(), thread::current().id()));
        let _unlock = captured.map(UnlockOnDrop);
        self.inner.commit_request(session)
    }

    fn new_session_created(&self, session: &SessionId) {
        self.lock_manager(session);
        self.inner.new_session_created(session);
    }

    fn session_expired(&self, session: &SessionId) {
        self.inner.session_expired(session);
        self.locks.lock().remove(session);
    }

    fn destroy(&self) {
        self.inner.destroy();
        self.locks.lock().clear();
        self.held.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use std::thread;

    struct Page(u32);

    impl ManageablePage for Page {
        fn page_id(&self) -> PageId {
            PageId::new(self.0)
        }
    }

    /// Inner manager whose commit always fails.
    struct FailingCommit;

    impl PageManager<Page> for FailingCommit {
        fn get_page(&self, _: &SessionId, id: PageId) -> Result<Option<Arc<Page>>> {
            Ok(Some(Arc::new(Page(id.0))))
        }

        fn touch_page(&self, _: &SessionId, _: Arc<Page>) -> Result<()> {
            Ok(())
        }

        fn commit_request(&self, _: &SessionId) -> Result<()> {
            Err(Error::Serialization("boom".into()))
        }

        fn new_session_created(&self, _: &SessionId) {}

        fn session_expired(&self, _: &SessionId) {}

        fn destroy(&self) {}
    }

    #[test]
    fn test_get_page_takes_lock() {
        let manager = LockingPageManager::new(FailingCommit, Duration::from_millis(50));
        let s = SessionId::new("s");

        manager.get_page(&s, PageId::new(4)).unwrap();
        manager.touch_page(&s, Arc::new(Page(5))).unwrap();

        let locks = manager.lock_manager(&s);
        assert!(locks.is_locked(PageId::new(4)));
        assert!(locks.is_locked(PageId::new(5)));
    }

    #[test]
    fn test_failed_commit_still_unlocks() {
        let manager = LockingPageManager::new(FailingCommit, Duration::from_millis(50));
        let s = SessionId::new("s");

        manager.get_page(&s, PageId::new(1)).unwrap();
        assert!(manager.commit_request(&s).is_err());

        assert_eq!(manager.lock_manager(&s).lock_count(), 0);
    }

    #[test]
    fn test_sessions_lock_independently() {
        let manager = Arc::new(LockingPageManager::new(
            FailingCommit,
            Duration::from_millis(50),
        ));
        manager.get_page(&SessionId::new("a"), PageId::new(1)).unwrap();

        let other = Arc::clone(&manager);
        let result = thread::spawn(move || {
            let same_session = other.get_page(&SessionId::new("a"), PageId::new(1));
            let other_session = other.get_page(&SessionId::new("b"), PageId::new(1));
            (same_session.is_err(), other_session.is_ok())
        })
        .join()
        .unwrap();

        assert_eq!(result, (true, true));
    }

    #[test]
    fn test_commit_after_expiry_releases_without_recreating() {
        let manager = LockingPageManager::new(FailingCommit, Duration::from_millis(50));
        let s = SessionId::new("s");

        manager.get_page(&s, PageId::new(1)).unwrap();
        let locks = manager.lock_manager(&s);
        assert!(locks.is_locked(PageId::new(1)));

        // Logout in the middle of the request.
        manager.session_expired(&s);
        assert_eq!(manager.session_count(), 0);

        assert!(manager.commit_request(&s).is_err());
        assert_eq!(manager.session_count(), 0);
        assert_eq!(locks.lock_count(), 0);
    }

    #[test]
    fn test_commit_without_locks_creates_nothing() {
        let manager = LockingPageManager::new(FailingCommit, Duration::from_millis(50));

        assert!(manager.commit_request(&SessionId::new("idle")).is_err());
        assert_eq!(manager.session_count(), 0);
    }

    #[test]
    fn test_session_expired_drops_lock_manager() {
        let manager = LockingPageManager::new(FailingCommit, Duration::from_millis(50));
        let s = SessionId::new("s");

        manager.new_session_created(&s);
        let before = manager.lock_manager(&s);
        manager.session_expired(&s);

        assert!(!Arc::ptr_eq(&before, &manager.lock_manager(&s)));
    }
}
