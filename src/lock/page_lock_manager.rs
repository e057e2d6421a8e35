//! Page Lock Manager - per-page mutual exclusion between request threads.
//!
//! Two requests of the same session may be served by different threads at
//! the same time. Before touching a page, a request thread locks its id;
//! at the end of the request it releases everything it holds at once.

use std::collections::HashMap;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};

use crate::common::{Error, PageId, Result};

/// A held page lock.
#[derive(Debug, Clone)]
pub struct PageLock {
    pub page_id: PageId,
    pub owner: ThreadId,
    pub owner_name: String,
    pub created_at: Instant,
}

/// Advisory, re-entrant, timeout-bound locks keyed by page id.
///
/// # State machine (per page)
/// ```text
///   unlocked ──lock_page(T)──▶ locked(T) ──unlock_all_pages(T)──▶ unlocked
///                               │    ▲
///                               └────┘ lock_page(T) again: no-op
/// ```
///
/// # Thread Safety
/// All bookkeeping sits behind one `Mutex`; waiters block on a shared
/// `Condvar` and re-check the page on every wake-up. There is no fairness
/// between waiters.
///
/// # Example
/// ```
/// use pagevault::{PageId, PageLockManager};
/// use std::time::Duration;
///
/// let locks = PageLockManager::new(Duration::from_secs(1));
/// locks.lock_page(PageId::new(7)).unwrap();
/// locks.lock_page(PageId::new(7)).unwrap(); // re-entrant
/// locks.unlock_all_pages();
/// assert!(!locks.is_locked(PageId::new(7)));
/// ```
pub struct PageLockManager {
    locks: Mutex<HashMap<PageId, PageLock>>,
    released: Condvar,
    timeout: Duration,
}

impl PageLockManager {
    /// Create a lock manager whose `lock_page` waits at most `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Acquire the lock on `page_id` for the calling thread.
    ///
    /// Returns immediately if the page is free or already held by this
    /// thread; otherwise blocks until it is released or the timeout elapses.
    ///
    /// # Errors
    /// Returns `Error::PageLockTimeout` if another thread kept the page
    /// locked for the whole timeout.
    pub fn lock_page(&self, page_id: PageId) -> Result<()> {
        let current = thread::current();
        let start = Instant::now();
        let deadline = start + self.timeout;

        let mut locks = self.locks.lock();
        loop {
            match locks.get(&page_id) {
                None => {
                    locks.insert(
                        page_id,
                        PageLock {
                            page_id,
                            owner: current.id(),
                            owner_name: thread_name(&current),
                            created_at: Instant::now(),
                        },
                    );
                    trace!("{} locked by {}", page_id, thread_name(&current));
                    return Ok(());
                }
                Some(lock) if lock.owner == current.id() => return Ok(()),
                Some(lock) => {
                    if Instant::now() >= deadline {
                        let waited = start.elapsed();
                        warn!(
                            "thread '{}' gave up on {} held by '{}' after {:?}",
                            thread_name(&current),
                            page_id,
                            lock.owner_name,
                            waited
                        );
                        return Err(Error::PageLockTimeout {
                            page_id,
                            thread: thread_name(&current),
                            waited,
                        });
                    }
                    // Spurious or unrelated wake-ups just loop and re-check.
                    self.released.wait_until(&mut locks, deadline);
                }
            }
        }
    }

    /// Release every lock held by the calling thread and wake all waiters.
    ///
    /// Returns the number of locks released.
    pub fn unlock_all_pages(&self) -> usize {
        let current = thread::current().id();

        let released = {
            let mut locks = self.locks.lock();
            let before = locks.len();
            locks.retain(|_, lock| lock.owner != current);
            before - locks.len()
        };

        if released > 0 {
            debug!("released {} page lock(s)", released);
            self.released.notify_all();
        }
        released
    }

    /// Whether any thread holds `page_id`.
    pub fn is_locked(&self, page_id: PageId) -> bool {
        self.locks.lock().contains_key(&page_id)
    }

    /// The current holder of `page_id`, if any.
    pub fn holder(&self, page_id: PageId) -> Option<PageLock> {
        self.locks.lock().get(&page_id).cloned()
    }

    /// Number of locks held by all threads.
    pub fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn thread_name(thread: &thread::Thread) -> String {
    match thread.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", thread.id()),
    }
}
