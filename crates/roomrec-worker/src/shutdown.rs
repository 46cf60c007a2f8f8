//! Termination signal handling.
//!
//! SIGTERM and SIGINT flip a shared watch flag. The flag only ever goes
//! from `false` to `true`; later signals are logged and ignored since the
//! drain is already running.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Create the shutdown flag, initially `false`.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Mark shutdown as requested. Returns `true` if this call changed the flag.
pub fn request_shutdown(tx: &watch::Sender<bool>) -> bool {
    tx.send_if_modified(|requested| {
        let changed = !*requested;
        *requested = true;
        changed
    })
}

/// Listen for termination signals for the lifetime of the process.
pub fn spawn_signal_listener(tx: watch::Sender<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match wait_for_signal().await {
                Ok(name) => {
                    if request_shutdown(&tx) {
                        info!("Received {}, draining recording sessions before exit", name);
                    } else {
                        info!("Received {} while already draining", name);
                    }
                }
                Err(e) => {
                    error!("Failed to listen for termination signals: {}", e);
                    return;
                }
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl-C")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_is_sticky() {
        let (tx, rx) = shutdown_channel();
        assert!(!*rx.borrow());

        assert!(request_shutdown(&tx));
        assert!(*rx.borrow());
        assert!(!request_shutdown(&tx));
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_receivers_observe_request() {
        let (tx, mut rx) = shutdown_channel();
        let waiter = tokio::spawn(async move {
            rx.wait_for(|requested| *requested).await.is_ok()
        });

        request_shutdown(&tx);
        assert!(waiter.await.unwrap());
    }
}
