//! Shared file record and content hash.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Content hash for file data (BLAKE3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Hash the given data using BLAKE3.
    pub fn from_data(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<blake3::Hash> for ContentHash {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

/// One filesystem path currently offered for sharing.
///
/// The size is a snapshot taken when the file was shared and is never re-read
/// from disk. `content_hash` stays `None` until the hashing worker commits it,
/// after which it never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedFile {
    /// Absolute filesystem path; unique key in the index.
    pub path: PathBuf,

    /// File size in bytes at share time.
    pub cached_length: u64,

    /// Content hash, once hashing has completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<ContentHash>,

    /// Share timestamp (microseconds since the Unix epoch).
    pub shared_since_us: u64,

    /// Assigned by the index on insert; distinguishes successive shares of
    /// the same path.
    #[serde(default)]
    pub generation: u64,
}

impl SharedFile {
    /// Create an unhashed record stamped with the current time.
    pub fn new(path: impl Into<PathBuf>, cached_length: u64) -> Self {
        Self::new_at_time(path, cached_length, now_us())
    }

    /// Create a record with an explicit timestamp (for testing/reconstruction).
    pub fn new_at_time(path: impl Into<PathBuf>, cached_length: u64, shared_since_us: u64) -> Self {
        Self {
            path: path.into(),
            cached_length,
            content_hash: None,
            shared_since_us,
            generation: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_hashed(&self) -> bool {
        self.content_hash.is_some()
    }
}

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_micros() as u64
}
