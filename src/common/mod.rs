//! Common types and utilities shared across pagevault.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration
//! - Error types
//! - Identifiers (PageId, SessionId)

pub mod config;
pub mod error;
mod page_id;
mod session_id;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use page_id::PageId;
pub use session_id::SessionId;
