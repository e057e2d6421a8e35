//! Session identifier type.

use std::fmt;
use std::path::PathBuf;

/// Characters that cannot appear in a session directory name.
const UNSAFE_CHARS: [char; 4] = ['*', '/', ':', '\\'];

/// Modulus of the two hash-derived directory levels above a session folder.
const FANOUT: u32 = 9973;

/// Identifies the HTTP session that owns a set of pages.
///
/// The id is opaque; the only thing the store does with it besides hashing
/// is derive a directory name via [`SessionId::folder_name`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new SessionId.
    pub fn new(id: impl Into<String>) -> Self {
        SessionId(id.into())
    }

    /// The raw id.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// CRC32 of the raw id.
    pub fn id_hash(&self) -> u32 {
        crc32fast::hash(self.0.as_bytes())
    }

    /// Directory name for this session.
    ///
    /// `*`, `/`, `:` and `\` become `_`, and the hash of the raw id is
    /// appended, so ids that sanitize alike still get distinct names and no
    /// id maps to `""`, `.` or `..`.
    pub fn folder_name(&self) -> String {
        let sanitized: String = self
            .0
            .chars()
            .map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c })
            .collect();
        format!("{}-{:08x}", sanitized, self.id_hash())
    }

    /// Session directory relative to the store folder: `<low>/<high>/<name>`.
    ///
    /// The two hash-derived levels keep any one directory from collecting
    /// every session.
    pub fn folder_path(&self) -> PathBuf {
        let hash = self.id_hash();
        let low = hash % FANOUT;
        let high = (hash / FANOUT) % FANOUT;
        PathBuf::from(low.to_string())
            .join(high.to_string())
            .join(self.folder_name())
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        SessionId::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        SessionId(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session({})", self.0)
    }
}
