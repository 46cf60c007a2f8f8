//! Recording session binary: `roomrec-session <room> [tenant]`.
//!
//! Exits 0 only after every artifact was uploaded and the working
//! directory removed; any failure exits 1.

use std::sync::Arc;

use tracing::{error, info};

use roomrec_queue::JobDescriptor;
use roomrec_storage::S3Store;
use roomrec_video::VideoApiClient;
use roomrec_worker::logging::init_tracing;
use roomrec_worker::{RecordingSession, SessionConfig, WorkerError, WorkerResult};

#[tokio::main]
async fn main() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();
    init_tracing();

    match run().await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("Recording session failed: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> WorkerResult<()> {
    let mut args = std::env::args().skip(1);
    let room = args
        .next()
        .ok_or_else(|| WorkerError::config_error("usage: roomrec-session <room> [tenant]"))?;
    let tenant = args.next().unwrap_or_default();
    let job = JobDescriptor::new(room, tenant)?;

    let config = SessionConfig::from_env()?;
    let provider = VideoApiClient::new(config.video)?;
    let store = S3Store::new(config.storage);

    let session = RecordingSession::new(job, config.settings, Arc::new(provider), Arc::new(store));
    let report = session.run().await?;

    info!(
        session_id = %report.session_id,
        close_reason = ?report.close_reason,
        uploads = report.uploads.succeeded,
        "Session finished"
    );
    Ok(())
}
