//! pagevault - Disk-backed, per-session page storage for server-side UI state.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           pagevault                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Page Managers (manager/)                    │   │
//! │  │   LockingPageManager  →  StorePageManager                │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │            ↓ locks                        ↓ pages               │
//! │  ┌────────────────────────┐  ┌──────────────────────────────┐  │
//! │  │  Page Locks (lock/)    │  │     Page Cache (cache/)      │  │
//! │  │   PageLockManager      │  │  raw ⇄ materialized pages    │  │
//! │  └────────────────────────┘  └──────────────────────────────┘  │
//! │                              ↓ bytes                            │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Session File Store (storage/)                  │   │
//! │  │   one data file per session, ring-buffer WindowAllocator │   │
//! │  │   StoreIndex persisted across restarts                   │   │
//! │  │   SerializedPageCache of recently stored pages           │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           File Handle Pool (pool/)                       │   │
//! │  │   bounded open handles, LRU eviction, PooledFile guards  │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, SessionId, Error, config)
//! - [`pool`] - Bounded pool of open file handles
//! - [`storage`] - Window allocation, session data files, store index
//! - [`lock`] - Per-page locks across request threads
//! - [`cache`] - Page serialization and the request-scoped cache
//! - [`manager`] - Request-facing page managers
//!
//! # Quick Start
//! ```no_run
//! use std::sync::Arc;
//!
//! use pagevault::{PageId, SessionFileStore, SessionId, StoreConfig};
//!
//! let config = StoreConfig::new("my-app", std::env::temp_dir())
//!     .with_max_size_per_session(1024 * 1024);
//! let store = Arc::new(SessionFileStore::open(config).unwrap());
//!
//! let session = SessionId::new("A1B2C3");
//! store.put(&session, PageId::new(1), b"serialized page").unwrap();
//! assert_eq!(store.get(&session, PageId::new(1)).unwrap(), b"serialized page");
//!
//! // Session timed out: its data file goes away.
//! store.unbind(&session);
//! ```

pub mod cache;
pub mod common;
pub mod lock;
pub mod manager;
pub mod pool;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::{Error, PageId, Result, SessionId, StoreConfig};

pub use cache::{CachedPage, JsonPageSerializer, ManageablePage, PageCache, PageSerializer};
pub use lock::{PageLock, PageLockManager};
pub use manager::{LockingPageManager, PageManager, StorePageManager};
pub use pool::{FileHandlePool, PoolStats, PoolStatsSnapshot, PooledFile};
pub use storage::{SerializedPageCache, SessionFileStore, StoreIndex, Window, WindowAllocator};
