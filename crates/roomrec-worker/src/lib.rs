//! Room recording worker.
//!
//! This crate provides:
//! - The dispatcher: admission gate, queue polling, session spawning, drain on shutdown
//! - The recording session: capture, encode, upload, level-triggered drain
//! - Configuration, logging, metrics and the dispatcher's side HTTP server

pub mod admission;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod launcher;
pub mod load;
pub mod logging;
pub mod metrics;
pub mod registry;
pub mod retry;
pub mod server;
pub mod session;
pub mod shutdown;

#[cfg(test)]
mod testing;

pub use admission::{admit, AdmissionGate};
pub use config::{DispatcherConfig, DispatcherSettings, SessionConfig, SessionSettings};
pub use dispatcher::{Dispatcher, DispatcherStatus, MessageOutcome};
pub use error::{WorkerError, WorkerResult};
pub use launcher::{ProcessLauncher, SessionLauncher};
pub use load::{LoadSampler, SysinfoSampler};
pub use registry::{SessionRecord, SessionRegistry};
pub use session::{RecordingSession, SessionReport};
