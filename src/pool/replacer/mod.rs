//! Eviction policy implementations (replacers).
//!
//! Currently implements:
//! - [`LruReplacer`] - Least-recently-used, used by the file handle pool

mod lru;

pub use lru::LruReplacer;
