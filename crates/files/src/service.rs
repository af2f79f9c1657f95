//! Operations offered to request-handling layers.
//!
//! Everything arriving here is still in transport form. Paths are decoded up
//! front; nothing is mutated until every path in the request decoded cleanly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::codec;
use crate::controller::ShareController;
use crate::error::ShareError;
use crate::hashing::{Blake3Hasher, ContentHasher, HashingStatus, HashingTracker};
use crate::index::{ListTarget, Listing, MemoryShareIndex, ShareIndex};
use crate::shared_file::SharedFile;

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareStatus {
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashing: Option<PathBuf>,
}

/// What an unshare request removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnshareSummary {
    pub files: usize,
    pub directory_files: usize,
}

pub struct FilesService {
    controller: ShareController,
}

impl FilesService {
    pub fn new(controller: ShareController) -> Self {
        Self { controller }
    }

    /// In-memory index with the given hasher.
    pub fn with_hasher(hasher: Arc<dyn ContentHasher>) -> Self {
        let index: Arc<dyn ShareIndex> = Arc::new(MemoryShareIndex::new());
        let hashing = Arc::new(HashingTracker::new(index.clone(), hasher));
        Self::new(ShareController::new(index, hashing))
    }

    /// In-memory index hashed with BLAKE3.
    pub fn in_memory() -> Self {
        Self::with_hasher(Arc::new(Blake3Hasher::new()))
    }

    pub fn controller(&self) -> &ShareController {
        &self.controller
    }

    /// Spawn the hashing worker on the current tokio runtime.
    pub fn start_hashing(&self) -> JoinHandle<()> {
        self.controller.hashing().start()
    }

    pub fn stop_hashing(&self) {
        self.controller.hashing().stop();
    }

    pub fn status(&self) -> ShareStatus {
        ShareStatus {
            count: self.controller.index().count(),
            hashing: self.controller.hashing().current_target(),
        }
    }

    pub fn hashing_status(&self) -> HashingStatus {
        self.controller.hashing().status()
    }

    /// List a directory given as comma-joined segment tokens, or the roots
    /// when no path is given.
    pub fn list(&self, path_tokens: Option<&str>) -> Result<Listing, ShareError> {
        let target = match path_tokens {
            Some(tokens) => ListTarget::Directory(codec::decode_path(tokens)?),
            None => ListTarget::Roots,
        };
        Ok(self.controller.index().list(&target))
    }

    pub fn get(&self, path: &Path) -> Option<SharedFile> {
        self.controller.index().get(path)
    }

    /// Share a file given as a plain path string.
    pub fn share(&self, path: &str) -> Result<SharedFile, ShareError> {
        if path.trim().is_empty() {
            return Err(ShareError::bad_request("missing file parameter"));
        }
        self.controller.share(Path::new(path))
    }

    pub fn unshare_files(&self, paths: &str) -> Result<usize, ShareError> {
        self.unshare(Some(paths), None).map(|summary| summary.files)
    }

    pub fn unshare_directories(&self, paths: &str) -> Result<usize, ShareError> {
        self.unshare(None, Some(paths))
            .map(|summary| summary.directory_files)
    }

    /// Unshare files and directories from one request. Both lists are fully
    /// decoded before anything is removed.
    pub fn unshare(
        &self,
        files: Option<&str>,
        directories: Option<&str>,
    ) -> Result<UnshareSummary, ShareError> {
        if files.is_none() && directories.is_none() {
            return Err(ShareError::bad_request(
                "missing files or directories parameter",
            ));
        }
        let files = files.map(codec::decode_path_list).transpose()?;
        let directories = directories.map(codec::decode_path_list).transpose()?;

        let mut summary = UnshareSummary::default();
        for path in files.iter().flatten() {
            if self.controller.unshare_file(path) {
                summary.files += 1;
            }
        }
        for path in directories.iter().flatten() {
            summary.directory_files += self.controller.unshare_directory(path).len();
        }
        Ok(summary)
    }
}
