//! Page locking between concurrent requests of one session.
//!
//! - [`PageLockManager`] - Re-entrant, timeout-bound locks keyed by page id

mod page_lock_manager;

pub use page_lock_manager::{PageLock, PageLockManager};
