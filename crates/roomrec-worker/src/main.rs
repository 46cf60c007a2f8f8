//! Recording job dispatcher binary.

use std::sync::Arc;

use tracing::{error, info, warn};

use roomrec_queue::SqsQueue;
use roomrec_video::VideoApiClient;
use roomrec_worker::logging::init_tracing;
use roomrec_worker::server::{self, ServerState};
use roomrec_worker::shutdown::{shutdown_channel, spawn_signal_listener};
use roomrec_worker::{metrics, Dispatcher, DispatcherConfig, ProcessLauncher, SysinfoSampler};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting roomrec-dispatcher");

    let config = match DispatcherConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Dispatcher settings: {:?}", config.settings);

    let metrics_handle = match metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics disabled: {}", e);
            None
        }
    };

    let provider = match VideoApiClient::new(config.video.clone()) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create video API client: {}", e);
            std::process::exit(1);
        }
    };
    let queue = SqsQueue::new(config.queue.clone());
    let settings = config.settings;

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    spawn_signal_listener(shutdown_tx);

    let mut dispatcher = Dispatcher::new(
        settings.clone(),
        Arc::new(queue),
        Arc::new(provider),
        Arc::new(ProcessLauncher::new(&settings.session_binary)),
        Box::new(SysinfoSampler::new(settings.cpu_sample_window)),
        shutdown_rx,
    );

    let app = server::router(
        ServerState {
            status: dispatcher.status(),
        },
        metrics_handle,
        &settings.static_dir,
    );
    let port = settings.http_port;
    tokio::spawn(async move {
        if let Err(e) = server::serve(port, app).await {
            error!("Side server stopped: {}", e);
        }
    });

    dispatcher.run().await;

    info!("Dispatcher shutdown complete");
}
