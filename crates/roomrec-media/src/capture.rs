//! Capture surface bridge.
//!
//! The capture surface (a headless browser page joined to the room) runs in a
//! helper process. We drive it with newline-delimited JSON on its stdin and
//! read its calls back from its stdout:
//!
//! ```text
//! -> {"type":"start","token":"<jwt>","room":"room1"}
//! <- {"type":"append","data":"<base64 media chunk>"}
//! <- {"type":"info","message":"joined room"}
//! <- {"type":"close"}
//! ```
//!
//! EOF on stdout is reported as [`CaptureEvent::Close`].

use std::process::Stdio;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};

/// How long the bridge gets to exit on its own after its input closes.
const CLOSE_GRACE: Duration = Duration::from_secs(10);

const EVENT_BUFFER: usize = 256;

/// A call from the capture surface.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CaptureEvent {
    /// A base64 encoded media chunk for the encoder
    Append { data: String },
    /// The page asks for the session to end
    Close,
    Debug { message: String },
    Info { message: String },
    Error { message: String },
}

impl CaptureEvent {
    /// Parse one protocol line.
    pub fn parse_line(line: &str) -> MediaResult<Self> {
        serde_json::from_str(line.trim())
            .map_err(|e| MediaError::bridge_protocol(format!("unrecognised line: {}", e)))
    }
}

/// A command sent to the capture surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BridgeCommand<'a> {
    /// Join `room` using `token` and start streaming
    Start { token: &'a str, room: &'a str },
}

/// Decode an appended chunk.
///
/// Accepts plain base64 as well as a `data:<mime>;base64,` URL.
pub fn decode_chunk(data: &str) -> MediaResult<Vec<u8>> {
    let payload = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    STANDARD
        .decode(payload.trim())
        .map_err(|e| MediaError::InvalidChunk(e.to_string()))
}

/// Handle to the running capture surface process.
pub struct CaptureBridge {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl CaptureBridge {
    /// Launch the bridge command, pointing it at `page_url`.
    ///
    /// `command` may carry arguments (`"node bridge.js"`); `page_url` is
    /// appended as the last argument.
    pub fn launch(command: &str, page_url: &str) -> MediaResult<(Self, mpsc::Receiver<CaptureEvent>)> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| MediaError::bridge_protocol("empty capture bridge command"))?;
        which::which(program).map_err(|_| MediaError::program_not_found(program))?;

        let mut child = Command::new(program)
            .args(parts)
            .arg(page_url)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        info!("Capture bridge started with pid {:?}", child.id());

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::bridge_protocol("bridge stdout not captured"))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "roomrec::capture", "{}", line);
                }
            });
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match CaptureEvent::parse_line(&line) {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!("Ignoring capture bridge output: {}", e),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Capture bridge read failed: {}", e);
                        break;
                    }
                }
            }
            debug!("Capture bridge output closed");
            let _ = tx.send(CaptureEvent::Close).await;
        });

        Ok((Self { child, stdin }, rx))
    }

    /// Tell the capture surface to join `room` and start streaming.
    pub async fn start(&mut self, token: &str, room: &str) -> MediaResult<()> {
        self.send(&BridgeCommand::Start { token, room }).await
    }

    async fn send(&mut self, command: &BridgeCommand<'_>) -> MediaResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::bridge_protocol("bridge input closed"))?;
        let mut line = serde_json::to_vec(command)?;
        line.push(b'\n');
        stdin.write_all(&line).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Close the capture surface: end its input, then kill it if it lingers.
    pub async fn close(&mut self) {
        drop(self.stdin.take());

        match tokio::time::timeout(CLOSE_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => info!("Capture bridge exited with code {:?}", status.code()),
            Ok(Err(e)) => warn!("Failed waiting for capture bridge: {}", e),
            Err(_) => {
                warn!("Capture bridge did not exit within {:?}, killing", CLOSE_GRACE);
                if let Err(e) = self.child.kill().await {
                    warn!("Failed to kill capture bridge: {}", e);
                }
            }
        }
    }
}
