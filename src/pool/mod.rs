//! File handle pool.
//!
//! Every session owns one backing file, but only a bounded number of them
//! are kept open at any time. Handles are borrowed for a single read or
//! write and returned immediately after.
//!
//! # Components
//! - [`FileHandlePool`] - The pool itself
//! - [`PooledFile`] - RAII guard for a borrowed handle
//! - [`PoolStats`] - Performance statistics
//! - [`replacer`] - Eviction policy implementations

mod file_handle_pool;
mod handle;
pub mod replacer;
mod stats;

pub use file_handle_pool::FileHandlePool;
pub use handle::PooledFile;
pub use stats::{PoolStats, PoolStatsSnapshot};
