//! Live page objects in front of the byte store.
//!
//! # Components
//! - [`PageSerializer`] / [`ManageablePage`] - The pluggable page boundary
//! - [`JsonPageSerializer`] - serde-based serializer
//! - [`PageCache`] - Request-scoped cache with lazily converted entries

mod page_cache;
mod serializer;

pub use page_cache::{CachedPage, PageCache};
pub use serializer::{JsonPageSerializer, ManageablePage, PageSerializer};
