//! Transport encoding for filesystem paths.
//!
//! A path travels as a comma-joined list of tokens, one per segment. Each token
//! is the padded URL-safe base64 of the segment's raw bytes. That alphabet has
//! no comma and nothing a query string rewrites, so tokens can be placed in a
//! `?path=` value as they are and splitting on the separator is lossless. The first
//! segment names the filesystem root and every later segment is resolved as a
//! child of the path built so far.
//!
//! Decoding is all-or-nothing: every token is decoded before any segment is
//! resolved, and a single malformed token fails the whole path.

use std::ffi::{OsStr, OsString};
use std::path::{Component, Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;

use crate::error::CodecError;

/// Separator between tokens in the transport form.
pub const SEPARATOR: char = ',';

/// Encode one segment into a transport-safe token.
pub fn encode_segment(segment: &[u8]) -> String {
    URL_SAFE.encode(segment)
}

/// Decode one token. `index` is only used for error reporting.
pub fn decode_segment(index: usize, token: &str) -> Result<Vec<u8>, CodecError> {
    URL_SAFE
        .decode(token)
        .map_err(|err| CodecError::InvalidToken {
            index,
            reason: err.to_string(),
        })
}

/// Encode every segment independently.
pub fn encode_segments<I, S>(segments: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    segments
        .into_iter()
        .map(|segment| encode_segment(segment.as_ref()))
        .collect()
}

/// Decode a token sequence, failing on the first invalid token.
pub fn decode_tokens<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<Vec<u8>>, CodecError> {
    tokens
        .iter()
        .enumerate()
        .map(|(index, token)| decode_segment(index, token.as_ref()))
        .collect()
}

/// Split a transport string into its tokens.
///
/// The inverse of [`join_tokens`]: an empty string is one empty token.
pub fn split_tokens(transport: &str) -> Vec<&str> {
    transport.split(SEPARATOR).collect()
}

pub fn join_tokens<S: AsRef<str>>(tokens: &[S]) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.push_str(token.as_ref());
    }
    out
}

/// Break a path into its segments: the root (prefix plus root directory) first,
/// followed by one segment per normal component.
pub fn path_segments(path: &Path) -> Vec<Vec<u8>> {
    let mut root = OsString::new();
    let mut segments = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => root.push(prefix.as_os_str()),
            Component::RootDir => root.push(std::path::MAIN_SEPARATOR_STR),
            Component::CurDir => {}
            Component::ParentDir => segments.push(b"..".to_vec()),
            Component::Normal(name) => segments.push(os_to_bytes(name)),
        }
    }
    if !root.is_empty() {
        segments.insert(0, os_to_bytes(&root));
    }
    segments
}

/// Rebuild a path from decoded segments.
///
/// The first segment must be a filesystem root. Each later segment must be a
/// single, non-empty, normal path component.
pub fn resolve_segments(segments: &[Vec<u8>]) -> Result<PathBuf, CodecError> {
    let (root, rest) = segments.split_first().ok_or(CodecError::Empty)?;

    let root_path = PathBuf::from(bytes_to_os(0, root)?);
    let is_root = root_path.has_root()
        && root_path
            .components()
            .all(|c| matches!(c, Component::Prefix(_) | Component::RootDir));
    if !is_root {
        return Err(CodecError::UnsafeSegment { index: 0 });
    }

    let mut current = root_path;
    for (offset, segment) in rest.iter().enumerate() {
        let index = offset + 1;
        if !is_plain_name(segment) {
            return Err(CodecError::UnsafeSegment { index });
        }
        current.push(bytes_to_os(index, segment)?);
    }
    Ok(current)
}

/// Encode a path into its comma-joined transport form.
pub fn encode_path(path: &Path) -> String {
    join_tokens(&encode_segments(path_segments(path)))
}

/// Decode a comma-joined transport form into a path.
pub fn decode_path(transport: &str) -> Result<PathBuf, CodecError> {
    if transport.is_empty() {
        return Err(CodecError::Empty);
    }
    let tokens = split_tokens(transport);
    let segments = decode_tokens(&tokens)?;
    resolve_segments(&segments)
}

/// Encode a list of whole paths, one token per path.
pub fn encode_path_list<P: AsRef<Path>>(paths: &[P]) -> String {
    let tokens: Vec<String> = paths
        .iter()
        .map(|p| encode_segment(&os_to_bytes(p.as_ref().as_os_str())))
        .collect();
    join_tokens(&tokens)
}

/// Decode a list of whole paths. Every token is decoded before any path is
/// returned; an empty entry fails the list.
pub fn decode_path_list(transport: &str) -> Result<Vec<PathBuf>, CodecError> {
    if transport.is_empty() {
        return Err(CodecError::Empty);
    }
    let tokens = split_tokens(transport);
    let raw = decode_tokens(&tokens)?;
    raw.iter()
        .enumerate()
        .map(|(index, bytes)| {
            if bytes.is_empty() {
                return Err(CodecError::UnsafeSegment { index });
            }
            bytes_to_os(index, bytes).map(PathBuf::from)
        })
        .collect()
}

fn is_plain_name(segment: &[u8]) -> bool {
    if segment.is_empty() || segment == b"." || segment == b".." {
        return false;
    }
    !segment
        .iter()
        .any(|&b| b == b'/' || (cfg!(windows) && (b == b'\\' || b == b':')))
}

#[cfg(unix)]
fn os_to_bytes(s: &OsStr) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    s.as_bytes().to_vec()
}

#[cfg(not(unix))]
fn os_to_bytes(s: &OsStr) -> Vec<u8> {
    s.to_string_lossy().into_owned().into_bytes()
}

#[cfg(unix)]
fn bytes_to_os(_index: usize, bytes: &[u8]) -> Result<OsString, CodecError> {
    use std::os::unix::ffi::OsStrExt;
    Ok(OsStr::from_bytes(bytes).to_os_string())
}

#[cfg(not(unix))]
fn bytes_to_os(index: usize, bytes: &[u8]) -> Result<OsString, CodecError> {
    String::from_utf8(bytes.to_vec())
        .map(OsString::from)
        .map_err(|_| CodecError::NonUtf8 { index })
}
