//! One recording session.
//!
//! `STARTING -> CAPTURING -> CLOSING -> DRAINING -> DONE`
//!
//! The session owns its working directory, encoder, capture bridge and
//! upload tasks. It reaches `DONE` only after the drain check confirms the
//! encoder exited and every artifact was uploaded and deleted.

pub mod drain;
pub mod state;
pub mod uploads;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use roomrec_media::{
    decode_chunk, CaptureBridge, CaptureEvent, EncoderProcess, HlsEncoderCommand, SegmentWatcher,
};
use roomrec_queue::JobDescriptor;
use roomrec_storage::ArtifactStore;
use roomrec_video::SessionProvider;

use crate::config::SessionSettings;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::session_span;
use crate::retry::FailureStreak;

pub use drain::wait_until_drained;
pub use state::{CloseReason, PhaseTracker, SessionPhase, TerminationState};
pub use uploads::{ArtifactUploader, UploadOutcome, UploadStats, UploadTracker};

/// How long queued capture output is still fed to the encoder after close.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub session_id: String,
    pub close_reason: CloseReason,
    pub encoder_exit_code: Option<i32>,
    pub bytes_encoded: u64,
    pub uploads: UploadStats,
}

pub struct RecordingSession {
    job: JobDescriptor,
    session_id: String,
    settings: SessionSettings,
    provider: Arc<dyn SessionProvider>,
    store: Arc<dyn ArtifactStore>,
    phase: PhaseTracker,
}

impl RecordingSession {
    pub fn new(
        job: JobDescriptor,
        settings: SessionSettings,
        provider: Arc<dyn SessionProvider>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            job,
            session_id: Uuid::new_v4().to_string(),
            settings,
            provider,
            store,
            phase: PhaseTracker::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase.phase()
    }

    /// `<work_dir>/<room>-<session_id>`
    pub fn work_dir(&self) -> PathBuf {
        self.settings
            .work_dir
            .join(format!("{}-{}", self.job.room_name(), self.session_id))
    }

    /// `<room>/<session_id>`
    pub fn key_prefix(&self) -> String {
        format!("{}/{}", self.job.room_name(), self.session_id)
    }

    /// Run the session to completion.
    pub async fn run(mut self) -> WorkerResult<SessionReport> {
        let span = session_span(&self.job, &self.session_id);
        async move {
            let work_dir = self.work_dir();
            tokio::fs::create_dir_all(&work_dir).await.map_err(|e| {
                WorkerError::session_fatal(format!("cannot create {}: {}", work_dir.display(), e))
            })?;

            let result = self.record(&work_dir).await;
            if let Err(e) = &result {
                error!(phase = %self.phase(), "Recording session failed: {}", e);
                // Only succeeds if nothing was recorded.
                let _ = tokio::fs::remove_dir(&work_dir).await;
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn record(&mut self, work_dir: &Path) -> WorkerResult<SessionReport> {
        let room = self.job.room_name().to_string();
        let identity = self.settings.identity.clone();
        info!("Starting recording in {}", work_dir.display());

        // The watcher comes first so no segment is missed.
        let (watcher, mut appeared) = SegmentWatcher::watch(work_dir)?;
        let uploader = ArtifactUploader::new(
            self.store.clone(),
            self.key_prefix(),
            self.settings.upload_retry,
        );

        let command = HlsEncoderCommand::new(work_dir).program(&self.settings.encoder_program);
        let mut encoder = EncoderProcess::spawn(&command)?;

        let token = self.provider.mint_access_token(&identity, &room)?;
        let (mut bridge, mut events) =
            CaptureBridge::launch(&self.settings.capture_bridge, &self.settings.capture_page_url)?;
        bridge.start(&token, &room).await?;

        self.phase.advance(SessionPhase::Capturing)?;
        let mut encoder_exit = encoder.exit_watch();
        let mut write_failures = FailureStreak::new(3);
        let deadline = tokio::time::sleep(self.settings.hard_timeout);
        tokio::pin!(deadline);

        let reason = loop {
            tokio::select! {
                _ = &mut deadline => break CloseReason::Timeout,
                Some(path) = appeared.recv() => {
                    uploader.spawn_upload(path);
                }
                event = events.recv() => match event {
                    Some(CaptureEvent::Append { data }) => {
                        feed(&mut encoder, &data, &mut write_failures).await;
                    }
                    Some(CaptureEvent::Close) => break CloseReason::Requested,
                    Some(CaptureEvent::Debug { message }) => debug!(target: "roomrec::capture", "{}", message),
                    Some(CaptureEvent::Info { message }) => info!(target: "roomrec::capture", "{}", message),
                    Some(CaptureEvent::Error { message }) => error!(target: "roomrec::capture", "{}", message),
                    None => break CloseReason::CaptureEnded,
                },
                Ok(()) = encoder_exit.changed() => {
                    if encoder_exit.borrow().is_some() {
                        break CloseReason::EncoderExited;
                    }
                }
            }
        };

        self.phase.advance(SessionPhase::Closing)?;
        info!(?reason, "Closing recording");

        if reason.disconnects_identity() {
            if let Err(e) = self.provider.disconnect_participant(&room, &identity).await {
                warn!("Failed to disconnect {} from {}: {}", identity, room, e);
            }
        }

        bridge.close().await;
        flush_capture(&mut events, &mut encoder, &mut write_failures).await;
        encoder.finish_input().await;

        while let Ok(path) = appeared.try_recv() {
            uploader.spawn_upload(path);
        }
        drop(watcher);

        self.phase.advance(SessionPhase::Draining)?;
        let state = wait_until_drained(
            work_dir,
            encoder.exit_watch(),
            &uploader,
            self.settings.drain_poll_interval,
        )
        .await;
        debug!(?state, "Drain complete");

        tokio::fs::remove_dir(work_dir).await?;
        self.phase.advance(SessionPhase::Done)?;

        let encoder_exit_code = encoder.exit().and_then(|exit| exit.code);
        if encoder_exit_code != Some(0) {
            let err = WorkerError::encoder_io(format!("encoder exited with {:?}", encoder_exit_code));
            warn!("{}", err);
        }

        let report = SessionReport {
            session_id: self.session_id.clone(),
            close_reason: reason,
            encoder_exit_code,
            bytes_encoded: encoder.bytes_written(),
            uploads: uploader.tracker().stats(),
        };
        info!(
            uploads = report.uploads.succeeded,
            bytes = report.bytes_encoded,
            "Recording complete"
        );
        Ok(report)
    }
}

/// Write one appended chunk to the encoder. Empty chunks are skipped.
async fn feed(encoder: &mut EncoderProcess, data: &str, failures: &mut FailureStreak) {
    let bytes = match decode_chunk(data) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Dropping capture chunk: {}", e);
            return;
        }
    };
    if bytes.is_empty() {
        return;
    }

    match encoder.append(&bytes).await {
        Ok(()) => failures.succeeded(),
        Err(e) => {
            if failures.failed() {
                warn!("{}", WorkerError::encoder_io(e.to_string()));
            }
        }
    }
}

/// Feed whatever the capture surface queued before it went away.
async fn flush_capture(
    events: &mut mpsc::Receiver<CaptureEvent>,
    encoder: &mut EncoderProcess,
    failures: &mut FailureStreak,
) {
    let flush = async {
        while let Some(event) = events.recv().await {
            if let CaptureEvent::Append { data } = event {
                feed(&mut *encoder, &data, &mut *failures).await;
            }
        }
    };
    if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, flush).await.is_err() {
        warn!("Capture output still open after {:?}, not flushing further", CLOSE_FLUSH_TIMEOUT);
    }
}
