//! Error types for pagevault.

use std::time::Duration;

use thiserror::Error;

use crate::common::PageId;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in pagevault.
///
/// Only two of these are meant to reach the framework during normal
/// operation: [`Error::PageLockTimeout`] (the page is busy, the request may
/// be retried) and [`Error::OversizedPage`]. I/O trouble inside the store is
/// logged and degraded to "page unavailable" rather than returned.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from a backing file or the index file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serialized page does not fit into the per-session byte budget.
    #[error("{page_id} is {size} bytes, exceeding the per-session limit of {max} bytes")]
    OversizedPage { page_id: PageId, size: u64, max: u64 },

    /// A window of zero bytes was requested.
    #[error("{0} has no data to store")]
    EmptyPage(PageId),

    /// Another thread held the page lock for longer than the configured timeout.
    #[error("thread '{thread}' could not acquire lock on {page_id} within {waited:?}")]
    PageLockTimeout {
        page_id: PageId,
        thread: String,
        waited: Duration,
    },

    /// The index snapshot failed validation.
    #[error("index corrupt: {0}")]
    IndexCorrupt(String),

    /// The pluggable page serializer failed.
    #[error("page serialization failed: {0}")]
    Serialization(String),

    /// The index payload could not be encoded or decoded.
    #[error("index encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// The file handle pool was used after `destroy()`.
    #[error("file handle pool has been destroyed")]
    PoolDestroyed,

    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether the caller may retry the same operation later.
    ///
    /// Lock timeouts mean "page busy"; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::PageLockTimeout { .. })
    }
}
