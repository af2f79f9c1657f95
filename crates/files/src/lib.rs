//! fshare shared-file index
//!
//! Tracks which files on the local filesystem are offered for sharing, lets
//! callers browse them as a directory tree, and hashes newly shared files in
//! the background. Paths cross transport boundaries as comma-joined base64
//! segment tokens (see [`codec`]).

pub mod codec;
pub mod controller;
pub mod error;
pub mod hashing;
pub mod index;
pub mod service;
pub mod shared_file;

pub use controller::ShareController;
pub use error::{CodecError, ErrorKind, IndexError, ShareError};
pub use hashing::{Blake3Hasher, ContentHasher, HashJob, HashingStatus, HashingTracker};
pub use index::{ListEntry, ListTarget, Listing, MemoryShareIndex, ShareIndex};
pub use service::{FilesService, ShareStatus, UnshareSummary};
pub use shared_file::{ContentHash, SharedFile};

#[cfg(test)]
mod tests;
