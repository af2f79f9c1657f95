//! Share and unshare orchestration.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{IndexError, ShareError};
use crate::hashing::HashingTracker;
use crate::index::ShareIndex;
use crate::shared_file::SharedFile;

/// Applies share/unshare mutations to the index and keeps the hashing queue
/// in step with them.
pub struct ShareController {
    index: Arc<dyn ShareIndex>,
    hashing: Arc<HashingTracker>,
}

impl ShareController {
    pub fn new(index: Arc<dyn ShareIndex>, hashing: Arc<HashingTracker>) -> Self {
        Self { index, hashing }
    }

    pub fn index(&self) -> &Arc<dyn ShareIndex> {
        &self.index
    }

    pub fn hashing(&self) -> &Arc<HashingTracker> {
        &self.hashing
    }

    /// Share a single regular file.
    ///
    /// Sharing a path that is already shared returns the existing record
    /// untouched: its hash is not reset and it is not queued again.
    pub fn share(&self, path: &Path) -> Result<SharedFile, ShareError> {
        let path = normalize_share_path(path)?;

        if let Some(existing) = self.index.get(&path) {
            debug!("{} is already shared", path.display());
            return Ok(existing);
        }

        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ShareError::NotExists(path));
            }
            Err(err) => {
                warn!("Failed to stat {}: {}", path.display(), err);
                return Err(ShareError::io(path, err));
            }
        };
        if !metadata.is_file() {
            return Err(ShareError::NotAFile(path));
        }

        match self.index.insert(SharedFile::new(path, metadata.len())) {
            Ok(stored) => {
                self.hashing.enqueue(&stored.path, stored.generation);
                info!(
                    "Shared {} ({} bytes)",
                    stored.path.display(),
                    stored.cached_length
                );
                Ok(stored)
            }
            // lost a race with a concurrent share of the same path
            Err(IndexError::AlreadyShared(existing)) => Ok(*existing),
        }
    }

    /// Stop sharing one file. Unknown paths are a no-op.
    pub fn unshare_file(&self, path: &Path) -> bool {
        match self.index.remove_file(path) {
            Some(removed) => {
                self.hashing.cancel(&removed.path, removed.generation);
                info!("Unshared {}", removed.path.display());
                true
            }
            None => false,
        }
    }

    /// Stop sharing every file at or below `path`, in one step.
    pub fn unshare_directory(&self, path: &Path) -> Vec<PathBuf> {
        let removed = self.index.remove_directory(path);
        for file in &removed {
            self.hashing.cancel(&file.path, file.generation);
        }
        if !removed.is_empty() {
            info!("Unshared {} files under {}", removed.len(), path.display());
        }
        removed.into_iter().map(|file| file.path).collect()
    }
}

/// Share targets must be absolute and free of `.`/`..`; the stored key is
/// rebuilt from components so `/a//b/` and `/a/b` are the same file.
fn normalize_share_path(path: &Path) -> Result<PathBuf, ShareError> {
    if !path.is_absolute() {
        return Err(ShareError::bad_request(format!(
            "share path must be absolute: {}",
            path.display()
        )));
    }
    if path
        .components()
        .any(|c| matches!(c, Component::CurDir | Component::ParentDir))
    {
        return Err(ShareError::bad_request(format!(
            "share path must not contain relative components: {}",
            path.display()
        )));
    }
    Ok(path.components().collect())
}
