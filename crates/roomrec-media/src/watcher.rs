//! Watches a session's output directory for completed artifacts.

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::{MediaError, MediaResult};

/// Suffix the encoder uses while a file is still being written.
const IN_PROGRESS_SUFFIX: &str = ".tmp";

/// Whether `path` names a finished artifact rather than a partial write.
pub fn is_completed_artifact(path: &Path) -> bool {
    match path.file_name().and_then(|name| name.to_str()) {
        Some(name) => !name.starts_with('.') && !name.ends_with(IN_PROGRESS_SUFFIX),
        None => false,
    }
}

/// Paths in `event` that just appeared under their final name.
///
/// A rename is reported once as `To` (or `Any` on backends without
/// rename pairing); the paired `Both` event is skipped so each artifact
/// is reported once.
fn appeared_paths(event: &Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(_)
        | EventKind::Modify(ModifyKind::Name(RenameMode::To))
        | EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => event
            .paths
            .iter()
            .filter(|path| is_completed_artifact(path))
            .cloned()
            .collect(),
        _ => Vec::new(),
    }
}

/// Reports every completed artifact that appears in a directory.
///
/// Watching stops when this value is dropped.
pub struct SegmentWatcher {
    _watcher: RecommendedWatcher,
}

impl SegmentWatcher {
    /// Start watching `dir` (non-recursively).
    pub fn watch(dir: impl AsRef<Path>) -> MediaResult<(Self, mpsc::UnboundedReceiver<PathBuf>)> {
        let dir = dir.as_ref().to_path_buf();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for path in appeared_paths(&event) {
                        debug!("Artifact appeared: {}", path.display());
                        if tx.send(path).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => error!("Watch error: {:?}", e),
            },
        )
        .map_err(|e| MediaError::watch(format!("Failed to create watcher: {}", e)))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| MediaError::watch(format!("Failed to watch {}: {}", dir.display(), e)))?;

        info!("Watching {}", dir.display());
        Ok((Self { _watcher: watcher }, rx))
    }
}
