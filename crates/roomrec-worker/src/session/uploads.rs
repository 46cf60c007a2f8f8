//! Artifact upload tasks.
//!
//! Every completed segment gets its own task: claim the file by renaming
//! it, put it (with retries), then delete the claimed copy. [`UploadTracker`] counts every task a session
//! ever started so the drain check can tell when all of them resolved.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;
use tracing::{debug, warn, Instrument, Span};

use roomrec_storage::{artifact_key, content_type_for, ArtifactStore};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::retry::{FailureStreak, UploadRetry};

/// Failures logged in full before further upload failures are suppressed.
const MAX_LOGGED_UPLOAD_FAILURES: u32 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    pub created: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct TrackerInner {
    in_flight: HashSet<PathBuf>,
    stats: UploadStats,
}

/// Tracks in-flight upload tasks, at most one per path.
#[derive(Debug, Clone, Default)]
pub struct UploadTracker {
    inner: Arc<Mutex<TrackerInner>>,
    changed: Arc<Notify>,
}

impl UploadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a task for `path`; `None` if one is already in flight.
    pub fn begin(&self, path: &Path) -> Option<UploadGuard> {
        let mut inner = self.lock();
        if !inner.in_flight.insert(path.to_path_buf()) {
            return None;
        }
        inner.stats.created += 1;
        Some(UploadGuard {
            tracker: self.clone(),
            path: path.to_path_buf(),
            succeeded: false,
        })
    }

    /// Number of unresolved tasks.
    pub fn pending(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn stats(&self) -> UploadStats {
        self.lock().stats
    }

    /// Resolves after some task resolved since the last call.
    pub async fn changed(&self) {
        self.changed.notified().await
    }

    fn resolve(&self, path: &Path, succeeded: bool) {
        {
            let mut inner = self.lock();
            inner.in_flight.remove(path);
            if succeeded {
                inner.stats.succeeded += 1;
            } else {
                inner.stats.failed += 1;
            }
        }
        self.changed.notify_one();
    }
}

/// Marks one task in flight; resolves it when dropped.
///
/// A guard dropped without [`UploadGuard::succeed`] counts as failed,
/// which also covers a panicking task.
#[derive(Debug)]
pub struct UploadGuard {
    tracker: UploadTracker,
    path: PathBuf,
    succeeded: bool,
}

impl UploadGuard {
    pub fn succeed(mut self) {
        self.succeeded = true;
    }
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        self.tracker.resolve(&self.path, self.succeeded);
    }
}

/// How a finished task left the local file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Stored and deleted locally
    Uploaded,
    /// The file no longer existed
    Gone,
}

impl UploadOutcome {
    fn label(&self) -> &'static str {
        match self {
            UploadOutcome::Uploaded => "uploaded",
            UploadOutcome::Gone => "gone",
        }
    }
}

/// Suffix of a file claimed by an upload task.
const CLAIM_SUFFIX: &str = ".uploading";

/// Where a task moves `path` before reading it: a hidden sibling the
/// watcher ignores, so the encoder can write a new file under the old name.
pub fn claimed_path(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    path.with_file_name(format!(".{}{}", name, CLAIM_SUFFIX))
}

/// The artifact a path stands for: a claimed file maps back to its
/// original name, anything else to itself.
pub fn artifact_path(path: &Path) -> PathBuf {
    let original = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix('.'))
        .and_then(|n| n.strip_suffix(CLAIM_SUFFIX))
        .filter(|n| !n.is_empty());
    match original {
        Some(name) => path.with_file_name(name),
        None => path.to_path_buf(),
    }
}

/// Uploads one session's artifacts under its key prefix.
#[derive(Clone)]
pub struct ArtifactUploader {
    store: Arc<dyn ArtifactStore>,
    tracker: UploadTracker,
    key_prefix: String,
    retry: UploadRetry,
    failures: Arc<Mutex<FailureStreak>>,
}

impl ArtifactUploader {
    pub fn new(store: Arc<dyn ArtifactStore>, key_prefix: impl Into<String>, retry: UploadRetry) -> Self {
        Self {
            store,
            tracker: UploadTracker::new(),
            key_prefix: key_prefix.into(),
            retry,
            failures: Arc::new(Mutex::new(FailureStreak::new(MAX_LOGGED_UPLOAD_FAILURES))),
        }
    }

    pub fn tracker(&self) -> &UploadTracker {
        &self.tracker
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Start an upload task for `path` unless one is already running.
    ///
    /// A claimed file counts as the artifact it was claimed from. Returns
    /// whether a task was started.
    pub fn spawn_upload(&self, path: PathBuf) -> bool {
        let path = artifact_path(&path);
        let Some(guard) = self.tracker.begin(&path) else {
            return false;
        };

        let uploader = self.clone();
        tokio::spawn(
            async move {
                match uploader.upload_and_remove(&path).await {
                    Ok(outcome) => {
                        debug!("Artifact {} {}", path.display(), outcome.label());
                        metrics::record_upload(outcome.label());
                        uploader.failures().succeeded();
                        guard.succeed();
                    }
                    Err(e) => {
                        metrics::record_upload("failed");
                        if uploader.failures().failed() {
                            warn!("Upload of {} failed, will retry: {}", path.display(), e);
                        }
                        drop(guard);
                    }
                }
            }
            .instrument(Span::current()),
        );
        true
    }

    /// Claim the file, put it, then delete the claimed copy.
    ///
    /// The claim is a rename, so whatever the encoder writes under `path`
    /// afterwards is a new file left for a later task. A claimed file left
    /// by a failed task is uploaded before anything new is claimed.
    pub async fn upload_and_remove(&self, path: &Path) -> WorkerResult<UploadOutcome> {
        let claimed = claimed_path(path);
        let bytes = match tokio::fs::read(&claimed).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                match tokio::fs::rename(path, &claimed).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Ok(UploadOutcome::Gone)
                    }
                    Err(e) => return Err(e.into()),
                }
                tokio::fs::read(&claimed).await?
            }
            Err(e) => return Err(e.into()),
        };

        let key = artifact_key(&self.key_prefix, path)?;
        let content_type = content_type_for(path);
        let size = bytes.len();

        self.retry
            .run(|| self.store.put(&key, bytes.clone(), content_type))
            .await
            .map_err(|e| {
                WorkerError::upload_failed(format!(
                    "{} after {} attempts: {}",
                    key,
                    self.retry.attempts(),
                    e
                ))
            })?;

        match tokio::fs::remove_file(&claimed).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!("Uploaded {} ({} bytes)", key, size);
        Ok(UploadOutcome::Uploaded)
    }

    fn failures(&self) -> std::sync::MutexGuard<'_, FailureStreak> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
