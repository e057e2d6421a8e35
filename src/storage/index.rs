//! Index snapshot - session to file/window mappings kept across orderly restarts.
//!
//! # File Format
//! ```text
//! ┌──────────┬──────────────┬───────────────────────────┐
//! │ "PVIX"   │ CRC32 (LE)   │ JSON payload              │
//! │ 4 bytes  │ 4 bytes      │ StoreIndex                │
//! └──────────┴──────────────┴───────────────────────────┘
//! ```
//!
//! The snapshot is written once at shutdown and consumed (then deleted)
//! once at startup. Anything that fails to parse is reported as
//! `Error::IndexCorrupt`; the store treats that as "start empty".

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};
use crate::storage::AllocatorSnapshot;

/// Magic bytes at the start of every index file.
pub const INDEX_MAGIC: &[u8; 4] = b"PVIX";

/// Current payload version.
pub const INDEX_VERSION: u32 = 1;

const HEADER_LEN: usize = 8;

/// Everything the store needs to re-adopt one session's data file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIndexEntry {
    /// Data file path, relative to the store folder.
    pub file_name: PathBuf,
    pub allocator: AllocatorSnapshot,
}

/// The whole index: raw session id -> entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreIndex {
    pub version: u32,
    pub sessions: BTreeMap<String, SessionIndexEntry>,
}

impl StoreIndex {
    pub fn new() -> Self {
        Self {
            version: INDEX_VERSION,
            sessions: BTreeMap::new(),
        }
    }

    /// Encode into the on-disk format.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(self)?;
        let checksum = crc32fast::hash(&payload);

        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.extend_from_slice(INDEX_MAGIC);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode from the on-disk format.
    ///
    /// # Errors
    /// Returns `Error::IndexCorrupt` on bad magic, checksum, version or JSON.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN || &bytes[..4] != INDEX_MAGIC {
            return Err(Error::IndexCorrupt("missing index header".into()));
        }

        let stored = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let payload = &bytes[HEADER_LEN..];
        let actual = crc32fast::hash(payload);
        if stored != actual {
            return Err(Error::IndexCorrupt(format!(
                "checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored, actual
            )));
        }

        let index: StoreIndex = serde_json::from_slice(payload)
            .map_err(|e| Error::IndexCorrupt(format!("bad payload: {}", e)))?;
        if index.version != INDEX_VERSION {
            return Err(Error::IndexCorrupt(format!(
                "unsupported index version {}",
                index.version
            )));
        }
        Ok(index)
    }

    /// Write the index to `path`, replacing any previous file atomically.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let bytes = self.encode()?;
        let tmp = path.with_extension("tmp");

        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Read the index at `path` and delete the file.
    ///
    /// Returns Ok(None) if there is no index. The file is removed even when
    /// it fails to decode, so a later crash can never resurrect it.
    pub fn take_from(path: &Path) -> Result<Option<Self>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        fs::remove_file(path)?;

        if bytes.is_empty() {
            return Ok(None);
        }
        Self::decode(&bytes).map(Some)
    }
}
