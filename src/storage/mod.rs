//! Storage layer - where page bytes live on disk.
//!
//! This module handles persistent storage:
//! - [`WindowAllocator`] - Ring-buffer placement of pages inside a session file
//! - [`SessionFileStore`] - Per-session byte storage over pooled file handles
//! - [`SerializedPageCache`] - Bounded memory cache of recently stored pages
//! - [`index`] - Snapshot of session window maps kept across orderly restarts

mod file_store;
pub mod index;
mod serialized_cache;
mod window_allocator;

pub use file_store::SessionFileStore;
pub use index::StoreIndex;
pub use serialized_cache::SerializedPageCache;
pub use window_allocator::{AllocatorSnapshot, Window, WindowAllocator};
