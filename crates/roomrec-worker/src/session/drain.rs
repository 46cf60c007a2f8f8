//! Level-triggered drain check.
//!
//! After capture ends the session may only exit once the encoder has exited,
//! the working directory is empty and no upload task is unresolved. The
//! check re-reads the directory every time: segments can still land after
//! the encoder got end-of-input, and failed uploads leave their file behind.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use roomrec_media::{is_completed_artifact, EncoderExit};

use super::state::TerminationState;
use super::uploads::{artifact_path, ArtifactUploader};

/// Wait until the session is safe to tear down.
///
/// Each interval tick rescans the directory and starts an upload for every
/// file without one in flight. Before the encoder exits only completed
/// artifacts (or their claimed copies) are picked up; afterwards every file is, so a partial write the
/// encoder left behind cannot block the exit.
pub async fn wait_until_drained(
    dir: &Path,
    mut encoder_exit: watch::Receiver<Option<EncoderExit>>,
    uploader: &ArtifactUploader,
    poll_interval: Duration,
) -> TerminationState {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut rescan = true;

    loop {
        // Order matters: encoder first, then files, then tasks.
        let encoder_exited = encoder_exit.borrow().is_some();
        let files = match list_files(dir).await {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to list {}: {}", dir.display(), e);
                interval.tick().await;
                continue;
            }
        };
        let state = TerminationState {
            encoder_exited,
            files_remaining: files.len(),
            pending_uploads: uploader.tracker().pending(),
        };

        if state.ready_to_exit() {
            info!("Drained: encoder exited and all artifacts uploaded");
            return state;
        }

        if rescan {
            let started = files
                .into_iter()
                .filter(|path| encoder_exited || is_completed_artifact(&artifact_path(path)))
                .filter(|path| uploader.spawn_upload(path.clone()))
                .count();
            if started > 0 {
                debug!("Started {} upload tasks from rescan", started);
            }
        }

        debug!(
            encoder_exited = state.encoder_exited,
            files_remaining = state.files_remaining,
            pending_uploads = state.pending_uploads,
            "Waiting for drain"
        );

        rescan = tokio::select! {
            _ = interval.tick() => true,
            _ = uploader.tracker().changed() => false,
            Ok(()) = encoder_exit.changed(), if !encoder_exited => true,
        };
    }
}

/// Regular files directly inside `dir`. A missing directory is empty.
async fn list_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
