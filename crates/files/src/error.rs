//! Error types for the shared-file core.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::shared_file::SharedFile;

/// Coarse classification used by transport layers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    Internal,
}

/// Failures while decoding or resolving transported paths.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("empty path token list")]
    Empty,
    #[error("invalid path token at position {index}: {reason}")]
    InvalidToken { index: usize, reason: String },
    #[error("unsafe path segment at position {index}")]
    UnsafeSegment { index: usize },
    #[error("path segment at position {index} is not valid UTF-8")]
    NonUtf8 { index: usize },
}

/// Errors raised by the index itself.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The path is already present; carries the record that won.
    #[error("path already shared: {}", .0.path.display())]
    AlreadyShared(Box<SharedFile>),
}

/// Errors surfaced by share/unshare/list operations.
#[derive(Debug, Error)]
pub enum ShareError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("path does not exist: {}", .0.display())]
    NotExists(PathBuf),

    #[error("not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ShareError {
    pub(crate) fn bad_request(msg: impl Into<String>) -> Self {
        ShareError::BadRequest(msg.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ShareError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ShareError::BadRequest(_) => ErrorKind::BadRequest,
            ShareError::NotExists(_) | ShareError::NotAFile(_) => ErrorKind::NotFound,
            ShareError::Io { .. } => ErrorKind::Internal,
        }
    }
}

impl From<CodecError> for ShareError {
    fn from(err: CodecError) -> Self {
        ShareError::BadRequest(err.to_string())
    }
}
