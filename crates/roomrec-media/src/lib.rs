//! Media plumbing for a recording session.
//!
//! This crate provides:
//! - FFmpeg HLS encoder command building and a process handle fed through stdin
//! - A directory watcher reporting completed segment artifacts
//! - The capture surface bridge protocol (start, append, close, log forwarding)

pub mod capture;
pub mod encoder;
pub mod error;
pub mod watcher;

pub use capture::{decode_chunk, BridgeCommand, CaptureBridge, CaptureEvent};
pub use encoder::{EncoderExit, EncoderProcess, HlsEncoderCommand};
pub use error::{MediaError, MediaResult};
pub use watcher::{is_completed_artifact, SegmentWatcher};
