//! Configuration for pagevault.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

/// Default byte budget for one session's backing file (10MB).
///
/// With typical serialized pages of 20-100KB this keeps on the order of a
/// hundred pages of back-navigation history per session.
pub const DEFAULT_MAX_SIZE_PER_SESSION: u64 = 10 * 1024 * 1024;

/// Default number of simultaneously open backing files.
pub const DEFAULT_FILE_POOL_CAPACITY: usize = 50;

/// Default number of recently stored pages kept in memory, across all sessions.
pub const DEFAULT_SERIALIZED_CACHE_SIZE: usize = 40;

/// Default time a request thread waits for a page lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Default application name, used for the store folder.
pub const DEFAULT_APP_NAME: &str = "pagevault";

/// Name of the index snapshot file at the store root.
pub const INDEX_FILE_NAME: &str = "PageStoreIndex";

/// Name of the single data file inside each session directory.
pub const SESSION_DATA_FILE_NAME: &str = "data";

/// Construction-time settings for the page store.
///
/// Nothing here can be changed once a store has been built from it.
///
/// # Example
/// ```
/// use pagevault::StoreConfig;
/// use std::time::Duration;
///
/// let config = StoreConfig::new("shop", "/var/tmp")
///     .with_max_size_per_session(1024 * 1024)
///     .with_lock_timeout(Duration::from_secs(5));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Application name; the store lives in `<store_root>/<app_name>-filestore`.
    pub app_name: String,

    /// Parent directory of the store folder.
    pub store_root: PathBuf,

    /// Byte budget of each session's backing file.
    pub max_size_per_session: u64,

    /// Capacity of the shared file handle pool.
    pub file_pool_capacity: usize,

    /// Recently stored pages kept in memory in front of the data files.
    /// Zero disables the cache.
    pub serialized_cache_size: usize,

    /// Maximum time `lock_page` blocks before failing.
    #[serde(with = "duration_millis")]
    pub lock_timeout: Duration,
}

impl StoreConfig {
    /// Create a config with default limits for the given application.
    pub fn new(app_name: impl Into<String>, store_root: impl Into<PathBuf>) -> Self {
        Self {
            app_name: app_name.into(),
            store_root: store_root.into(),
            ..Self::default()
        }
    }

    pub fn with_max_size_per_session(mut self, bytes: u64) -> Self {
        self.max_size_per_session = bytes;
        self
    }

    pub fn with_file_pool_capacity(mut self, capacity: usize) -> Self {
        self.file_pool_capacity = capacity;
        self
    }

    pub fn with_serialized_cache_size(mut self, pages: usize) -> Self {
        self.serialized_cache_size = pages;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Folder holding the index file and one directory per session.
    pub fn store_folder(&self) -> PathBuf {
        self.store_root.join(format!("{}-filestore", self.app_name))
    }

    /// Check that every limit is usable.
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.app_name.is_empty() {
            return Err(Error::InvalidConfig("app_name must not be empty".into()));
        }
        if self.max_size_per_session == 0 {
            return Err(Error::InvalidConfig(
                "max_size_per_session must be > 0".into(),
            ));
        }
        if self.file_pool_capacity == 0 {
            return Err(Error::InvalidConfig("file_pool_capacity must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            store_root: std::env::temp_dir(),
            max_size_per_session: DEFAULT_MAX_SIZE_PER_SESSION,
            file_pool_capacity: DEFAULT_FILE_POOL_CAPACITY,
            serialized_cache_size: DEFAULT_SERIALIZED_CACHE_SIZE,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.max_size_per_session, 10 * 1024 * 1024);
        assert_eq!(config.file_pool_capacity, 50);
        assert_eq!(config.serialized_cache_size, 40);
        assert_eq!(config.lock_timeout, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_store_folder() {
        let config = StoreConfig::new("shop", "/srv/data");
        assert_eq!(config.store_folder(), PathBuf::from("/srv/data/shop-filestore"));
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = StoreConfig::default().with_max_size_per_session(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = StoreConfig::default().with_file_pool_capacity(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = StoreConfig::new("", "/tmp");
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_deserialize_partial_json() {
        let json = r#"{ "app_name": "shop", "lock_timeout": 250 }"#;
        let config: StoreConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.app_name, "shop");
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.file_pool_capacity, DEFAULT_FILE_POOL_CAPACITY);
        assert_eq!(config.serialized_cache_size, DEFAULT_SERIALIZED_CACHE_SIZE);
    }
}
