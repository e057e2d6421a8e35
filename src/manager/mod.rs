//! Page manager layer - what the request cycle talks to.
//!
//! A request looks pages up with `get_page`, marks the ones it changed with
//! `touch_page`, and ends with `commit_request`, which persists the touched
//! pages. Session lifecycle events arrive through `new_session_created` and
//! `session_expired`.
//!
//! # Components
//! - [`PageManager`] - The request-facing trait
//! - [`StorePageManager`] - Backed by a [`PageCache`](crate::cache::PageCache)
//! - [`LockingPageManager`] - Decorator adding per-page locks

mod locking;
mod store_manager;

use std::sync::Arc;

use crate::common::{PageId, Result, SessionId};

pub use locking::LockingPageManager;
pub use store_manager::StorePageManager;

/// Request-facing page management.
///
/// Implementations are shared by all request threads.
pub trait PageManager<P>: Send + Sync {
    /// The live page, or None if it never existed or has expired.
    fn get_page(&self, session: &SessionId, page_id: PageId) -> Result<Option<Arc<P>>>;

    /// Record that the current request changed `page`.
    fn touch_page(&self, session: &SessionId, page: Arc<P>) -> Result<()>;

    /// End of request: persist everything the current request touched.
    fn commit_request(&self, session: &SessionId) -> Result<()>;

    fn new_session_created(&self, session: &SessionId);

    /// The session is gone; drop every page it owned.
    fn session_expired(&self, session: &SessionId);

    /// Orderly shutdown.
    fn destroy(&self);
}
