//! The shared-file index and its listing protocol.

use crate::error::IndexError;
use crate::shared_file::{ContentHash, SharedFile};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::ops::Bound;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// What to enumerate: the filesystem roots, or one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListTarget {
    Roots,
    Directory(PathBuf),
}

impl From<Option<PathBuf>> for ListTarget {
    fn from(path: Option<PathBuf>) -> Self {
        match path {
            Some(path) => ListTarget::Directory(path),
            None => ListTarget::Roots,
        }
    }
}

/// One immediate child of a listed directory.
///
/// Names keep their raw bytes here. The XML listing renders them lossily, so
/// a client cannot navigate into a directory whose name is not valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEntry {
    File { name: OsString, size: u64 },
    Directory { name: OsString },
}

impl ListEntry {
    pub fn name(&self) -> &OsStr {
        match self {
            ListEntry::File { name, .. } | ListEntry::Directory { name } => name,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, ListEntry::File { .. })
    }
}

/// Immediate children of one directory, captured from a single snapshot of
/// the index. Files come first, then directories, each in name order.
///
/// Iterating does not consume the listing; it can be walked any number of times.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    entries: Vec<ListEntry>,
}

impl Listing {
    pub fn iter(&self) -> std::slice::Iter<'_, ListEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a child by name.
    pub fn find(&self, name: impl AsRef<OsStr>) -> Option<&ListEntry> {
        let name = name.as_ref();
        self.entries.iter().find(|entry| entry.name() == name)
    }
}

impl From<Vec<ListEntry>> for Listing {
    fn from(entries: Vec<ListEntry>) -> Self {
        Self { entries }
    }
}

impl IntoIterator for Listing {
    type Item = ListEntry;
    type IntoIter = std::vec::IntoIter<ListEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a Listing {
    type Item = &'a ListEntry;
    type IntoIter = std::slice::Iter<'a, ListEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Trait for shared-file index backends.
///
/// Every mutation is atomic with respect to `list`, `get` and `count`.
pub trait ShareIndex: Send + Sync {
    /// Number of shared files.
    fn count(&self) -> u64;

    /// Retrieve the record for a path.
    fn get(&self, path: &Path) -> Option<SharedFile>;

    /// Insert a new record and return it as stored (with its generation).
    /// Fails if the path is already present.
    fn insert(&self, file: SharedFile) -> Result<SharedFile, IndexError>;

    /// Remove a single file record.
    fn remove_file(&self, path: &Path) -> Option<SharedFile>;

    /// Remove the record at `path` and every record below it.
    fn remove_directory(&self, path: &Path) -> Vec<SharedFile>;

    /// Set the content hash of a record, only if the record is still present,
    /// belongs to `generation` and has no hash yet.
    fn commit_hash(&self, path: &Path, generation: u64, hash: ContentHash) -> bool;

    /// Enumerate the immediate children of `target`.
    fn list(&self, target: &ListTarget) -> Listing;
}

/// In-memory index keyed by path.
#[derive(Clone, Default)]
pub struct MemoryShareIndex {
    inner: Arc<RwLock<IndexState>>,
}

#[derive(Default)]
struct IndexState {
    /// Ordered by path components, so a directory's descendants are contiguous.
    files: BTreeMap<PathBuf, SharedFile>,
    next_generation: u64,
}

impl IndexState {
    fn descendants<'a>(
        &'a self,
        dir: &'a Path,
    ) -> impl Iterator<Item = (&'a PathBuf, &'a SharedFile)> + 'a {
        self.files
            .range::<Path, _>((Bound::Included(dir), Bound::Unbounded))
            .take_while(move |(path, _)| path.starts_with(dir))
    }
}

impl MemoryShareIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn list_roots(state: &IndexState) -> Listing {
        let mut entries: Vec<ListEntry> = Vec::new();
        for path in state.files.keys() {
            let root = root_of(path);
            if root.is_empty() {
                continue;
            }
            let seen = entries.iter().any(|entry| entry.name() == root.as_os_str());
            if !seen {
                entries.push(ListEntry::Directory { name: root });
            }
        }
        Listing { entries }
    }

    fn list_directory(state: &IndexState, dir: &Path) -> Listing {
        let mut files = Vec::new();
        let mut dirs: Vec<ListEntry> = Vec::new();

        for (path, file) in state.descendants(dir) {
            let Ok(relative) = path.strip_prefix(dir) else {
                continue;
            };
            let mut components = relative.components();
            let Some(Component::Normal(child)) = components.next() else {
                continue;
            };
            if components.next().is_none() {
                files.push(ListEntry::File {
                    name: child.to_os_string(),
                    size: file.cached_length,
                });
            } else if dirs.last().map(ListEntry::name) != Some(child) {
                // descendants of one child directory are contiguous
                dirs.push(ListEntry::Directory {
                    name: child.to_os_string(),
                });
            }
        }

        files.extend(dirs);
        Listing { entries: files }
    }
}

impl ShareIndex for MemoryShareIndex {
    fn count(&self) -> u64 {
        self.inner.read().files.len() as u64
    }

    fn get(&self, path: &Path) -> Option<SharedFile> {
        self.inner.read().files.get(path).cloned()
    }

    fn insert(&self, mut file: SharedFile) -> Result<SharedFile, IndexError> {
        let mut state = self.inner.write();
        if let Some(existing) = state.files.get(&file.path) {
            return Err(IndexError::AlreadyShared(Box::new(existing.clone())));
        }

        state.next_generation += 1;
        file.generation = state.next_generation;
        state.files.insert(file.path.clone(), file.clone());
        Ok(file)
    }

    fn remove_file(&self, path: &Path) -> Option<SharedFile> {
        self.inner.write().files.remove(path)
    }

    fn remove_directory(&self, path: &Path) -> Vec<SharedFile> {
        let mut state = self.inner.write();
        let doomed: Vec<PathBuf> = state.descendants(path).map(|(p, _)| p.clone()).collect();
        doomed
            .iter()
            .filter_map(|p| state.files.remove(p))
            .collect()
    }

    fn commit_hash(&self, path: &Path, generation: u64, hash: ContentHash) -> bool {
        let mut state = self.inner.write();
        match state.files.get_mut(path) {
            Some(file) if file.generation == generation && file.content_hash.is_none() => {
                file.content_hash = Some(hash);
                true
            }
            _ => false,
        }
    }

    fn list(&self, target: &ListTarget) -> Listing {
        let state = self.inner.read();
        match target {
            ListTarget::Roots => Self::list_roots(&state),
            ListTarget::Directory(dir) => Self::list_directory(&state, dir),
        }
    }
}

/// The prefix and root-directory part of a path, e.g. `/` or `C:\`.
fn root_of(path: &Path) -> OsString {
    let mut root = OsString::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => root.push(prefix.as_os_str()),
            Component::RootDir => root.push(std::path::MAIN_SEPARATOR_STR),
            _ => break,
        }
    }
    root
}
