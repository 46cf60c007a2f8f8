//! FFmpeg HLS encoder fed through stdin.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use metrics::counter;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};

/// Segment file name pattern inside the output directory.
pub const SEGMENT_PATTERN: &str = "data%02d.ts";

/// Playlist written next to the segments.
pub const PLAYLIST_NAME: &str = "master.m3u8";

/// Target segment duration in seconds.
const SEGMENT_SECONDS: u32 = 2;

const LOG_LEVEL: &str = "warning";

/// Builder for the HLS encoder command.
#[derive(Debug, Clone)]
pub struct HlsEncoderCommand {
    /// Encoder binary
    program: String,
    /// Directory receiving segments and playlist
    output_dir: PathBuf,
}

impl HlsEncoderCommand {
    /// Create a new encoder command writing into `output_dir`.
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            program: "ffmpeg".to_string(),
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    /// Override the encoder binary.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Build the command arguments.
    ///
    /// `temp_file` makes the muxer write `<name>.tmp` and rename on
    /// completion, so a segment only appears under its final name once whole.
    pub fn build_args(&self) -> Vec<String> {
        let dir = self.output_dir.to_string_lossy();

        vec![
            "-hide_banner".to_string(),
            "-v".to_string(),
            LOG_LEVEL.to_string(),
            "-i".to_string(),
            "-".to_string(),
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            SEGMENT_SECONDS.to_string(),
            "-hls_playlist_type".to_string(),
            "vod".to_string(),
            "-hls_flags".to_string(),
            "independent_segments+temp_file".to_string(),
            "-hls_segment_type".to_string(),
            "mpegts".to_string(),
            "-hls_segment_filename".to_string(),
            format!("{}/{}", dir, SEGMENT_PATTERN),
            "-var_stream_map".to_string(),
            "v:0".to_string(),
            format!("{}/{}", dir, PLAYLIST_NAME),
        ]
    }
}

/// How the encoder process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderExit {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
}

/// A running encoder.
///
/// Bytes are appended to its stdin; dropping the input with
/// [`EncoderProcess::finish_input`] signals end-of-stream. The exit is
/// published on a watch channel so several observers can wait on it.
pub struct EncoderProcess {
    stdin: Option<ChildStdin>,
    exit_rx: watch::Receiver<Option<EncoderExit>>,
    bytes_written: u64,
}

impl EncoderProcess {
    /// Spawn the encoder.
    pub fn spawn(cmd: &HlsEncoderCommand) -> MediaResult<Self> {
        which::which(&cmd.program).map_err(|_| MediaError::program_not_found(&cmd.program))?;

        let args = cmd.build_args();
        debug!("Running encoder: {} {}", cmd.program, args.join(" "));

        let mut child = Command::new(&cmd.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let pid = child.id();
        let stdin = child.stdin.take();

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "roomrec::encoder", "{}", line);
                }
            });
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => EncoderExit {
                    code: status.code(),
                },
                Err(e) => {
                    warn!("Failed waiting for encoder: {}", e);
                    EncoderExit { code: None }
                }
            };
            info!("Encoder exited with code {:?}", exit.code);
            let _ = exit_tx.send(Some(exit));
        });

        info!("Encoder started with pid {:?}", pid);
        Ok(Self {
            stdin,
            exit_rx,
            bytes_written: 0,
        })
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Write a chunk of captured media to the encoder.
    pub async fn append(&mut self, bytes: &[u8]) -> MediaResult<()> {
        let stdin = self.stdin.as_mut().ok_or(MediaError::EncoderInputClosed)?;
        stdin.write_all(bytes).await?;
        self.bytes_written += bytes.len() as u64;
        counter!("recorder_encoder_bytes_total").increment(bytes.len() as u64);
        Ok(())
    }

    /// Close the encoder's input. Idempotent.
    pub async fn finish_input(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.shutdown().await {
                warn!("Failed to flush encoder input: {}", e);
            }
            debug!("Encoder input closed after {} bytes", self.bytes_written);
        }
    }

    pub fn input_open(&self) -> bool {
        self.stdin.is_some()
    }

    /// Receiver that turns `Some` once the encoder has exited.
    pub fn exit_watch(&self) -> watch::Receiver<Option<EncoderExit>> {
        self.exit_rx.clone()
    }

    pub fn exit(&self) -> Option<EncoderExit> {
        *self.exit_rx.borrow()
    }
}
