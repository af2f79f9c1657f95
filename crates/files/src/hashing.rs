//! Background content hashing.
//!
//! Newly shared files are queued here and hashed one at a time by a single
//! worker task. The hash itself runs on the blocking pool with no lock held;
//! locks are only taken to pick the next job and to commit its result.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::index::ShareIndex;
use crate::shared_file::ContentHash;

const DEFAULT_READ_BUFFER: usize = 64 * 1024;

/// Produces a content hash for a file on disk.
pub trait ContentHasher: Send + Sync {
    fn hash_file(&self, path: &Path) -> io::Result<ContentHash>;
}

/// Streams the file through BLAKE3.
#[derive(Debug, Clone)]
pub struct Blake3Hasher {
    buffer_size: usize,
}

impl Blake3Hasher {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_READ_BUFFER)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }
}

impl Default for Blake3Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentHasher for Blake3Hasher {
    fn hash_file(&self, path: &Path) -> io::Result<ContentHash> {
        let mut file = File::open(path)?;
        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let n = match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize().into())
    }
}

/// A queued hashing request for one share of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashJob {
    pub path: PathBuf,
    pub generation: u64,
}

/// Snapshot of the hashing queue for status reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HashingStatus {
    pub current: Option<PathBuf>,
    pub queued: usize,
    pub completed: u64,
    pub failed: u64,
    pub discarded: u64,
}

#[derive(Default)]
struct TrackerState {
    queue: VecDeque<HashJob>,
    current: Option<HashJob>,
    current_cancelled: bool,
    stopped: bool,
}

/// Serializes hashing of shared files and commits results into the index.
pub struct HashingTracker {
    index: Arc<dyn ShareIndex>,
    hasher: Arc<dyn ContentHasher>,
    state: Mutex<TrackerState>,
    wakeup: Notify,
    completed: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

impl HashingTracker {
    pub fn new(index: Arc<dyn ShareIndex>, hasher: Arc<dyn ContentHasher>) -> Self {
        Self {
            index,
            hasher,
            state: Mutex::new(TrackerState::default()),
            wakeup: Notify::new(),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Queue a path for hashing. Returns false when nothing was queued: the
    /// path is already waiting, is being hashed for the same share, or its
    /// record already carries a hash.
    pub fn enqueue(&self, path: &Path, generation: u64) -> bool {
        let mut state = self.state.lock();

        if let Some(job) = state.queue.iter_mut().find(|job| job.path == path) {
            job.generation = generation;
            return false;
        }
        if let Some(current) = &state.current {
            if !state.current_cancelled && current.path == path && current.generation == generation
            {
                return false;
            }
        }
        if self.index.get(path).is_some_and(|file| file.is_hashed()) {
            return false;
        }

        state.queue.push_back(HashJob {
            path: path.to_path_buf(),
            generation,
        });
        drop(state);

        self.wakeup.notify_one();
        true
    }

    /// Drop a pending job, or mark the in-flight one so its result is
    /// discarded. Returns true if anything matched.
    pub fn cancel(&self, path: &Path, generation: u64) -> bool {
        let mut state = self.state.lock();

        let before = state.queue.len();
        state
            .queue
            .retain(|job| !(job.path == path && job.generation == generation));
        let mut matched = state.queue.len() != before;

        let in_flight = state
            .current
            .as_ref()
            .is_some_and(|job| job.path == path && job.generation == generation);
        if in_flight {
            state.current_cancelled = true;
            matched = true;
        }

        if matched {
            debug!("Cancelled hashing of {}", path.display());
        }
        matched
    }

    /// The path currently being hashed, if any.
    pub fn current_target(&self) -> Option<PathBuf> {
        let state = self.state.lock();
        if state.current_cancelled {
            return None;
        }
        state.current.as_ref().map(|job| job.path.clone())
    }

    pub fn status(&self) -> HashingStatus {
        let (current, queued) = {
            let state = self.state.lock();
            let current = state
                .current
                .as_ref()
                .filter(|_| !state.current_cancelled)
                .map(|job| job.path.clone());
            (current, state.queue.len())
        };
        HashingStatus {
            current,
            queued,
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    /// True when nothing is queued or in flight.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.queue.is_empty() && state.current.is_none()
    }

    /// Spawn the worker on the current tokio runtime.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move { tracker.run().await })
    }

    /// Ask the worker to exit once the in-flight job (if any) has finished.
    pub fn stop(&self) {
        self.state.lock().stopped = true;
        self.wakeup.notify_one();
    }

    async fn run(&self) {
        info!("Hashing worker started");
        loop {
            let next = {
                let mut state = self.state.lock();
                if state.stopped {
                    break;
                }
                let job = state.queue.pop_front();
                if let Some(job) = &job {
                    state.current = Some(job.clone());
                    state.current_cancelled = false;
                }
                job
            };

            let Some(job) = next else {
                self.wakeup.notified().await;
                continue;
            };

            debug!("Hashing {}", job.path.display());
            let hasher = Arc::clone(&self.hasher);
            let path = job.path.clone();
            let result = tokio::task::spawn_blocking(move || hasher.hash_file(&path)).await;
            self.finish(job, result);
        }
        info!("Hashing worker stopped");
    }

    fn finish(&self, job: HashJob, result: Result<io::Result<ContentHash>, JoinError>) {
        let mut state = self.state.lock();
        let cancelled = state.current_cancelled;
        state.current = None;
        state.current_cancelled = false;

        if cancelled {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            debug!("Discarding hash of cancelled {}", job.path.display());
            return;
        }

        match result {
            Ok(Ok(hash)) => {
                // The index re-checks presence and generation under its own lock,
                // so an unshare that already happened always wins.
                if self.index.commit_hash(&job.path, job.generation, hash) {
                    self.completed.fetch_add(1, Ordering::Relaxed);
                    info!("Hashed {} ({})", job.path.display(), hash.to_hex());
                } else {
                    self.discarded.fetch_add(1, Ordering::Relaxed);
                    debug!("{} is no longer shared, hash discarded", job.path.display());
                }
            }
            Ok(Err(err)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to hash {}: {}", job.path.display(), err);
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                error!("Hashing task for {} aborted: {}", job.path.display(), err);
            }
        }
    }
}
