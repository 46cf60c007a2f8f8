//! Worker configuration.
//!
//! Each process role reads its settings once at startup. Tunables fall back
//! to their defaults when unset or unparseable; credentials are required.

use std::path::PathBuf;
use std::time::Duration;

use roomrec_queue::QueueConfig;
use roomrec_storage::S3Config;
use roomrec_video::VideoApiConfig;

use crate::admission::DEFAULT_CPU_THRESHOLD;
use crate::error::{WorkerError, WorkerResult};
use crate::retry::UploadRetry;

/// Name of the session binary installed next to the dispatcher.
pub const SESSION_BINARY_NAME: &str = "roomrec-session";

/// Hard cap on a single recording.
pub const SESSION_HARD_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Dispatcher tunables.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// CPU percentage at or above which polling is skipped
    pub cpu_threshold: f32,
    /// Long-poll wait per receive
    pub receive_wait: Duration,
    /// Messages requested per receive
    pub max_messages: i32,
    /// Interval of the registry check while draining
    pub drain_check_interval: Duration,
    /// Pause after a backpressure skip
    pub backpressure_delay: Duration,
    /// Window the CPU sample is averaged over
    pub cpu_sample_window: Duration,
    /// Pause after a failed receive
    pub receive_error_backoff: Duration,
    /// Port of the side HTTP server
    pub http_port: u16,
    /// Directory holding the capture page and bundle
    pub static_dir: PathBuf,
    /// Session binary to spawn per job
    pub session_binary: PathBuf,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            cpu_threshold: DEFAULT_CPU_THRESHOLD,
            receive_wait: Duration::from_secs(20),
            max_messages: 10,
            drain_check_interval: Duration::from_secs(1),
            backpressure_delay: Duration::from_secs(1),
            cpu_sample_window: Duration::from_secs(1),
            receive_error_backoff: Duration::from_secs(5),
            http_port: 3005,
            static_dir: PathBuf::from("./public"),
            session_binary: default_session_binary(),
        }
    }
}

impl DispatcherSettings {
    /// Create settings from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cpu_threshold: env_or("RECORDER_CPU_THRESHOLD", defaults.cpu_threshold),
            receive_wait: Duration::from_secs(env_or("RECORDER_RECEIVE_WAIT_SECS", 20)),
            max_messages: env_or("RECORDER_MAX_MESSAGES", defaults.max_messages),
            drain_check_interval: Duration::from_millis(env_or("RECORDER_DRAIN_CHECK_MS", 1000)),
            backpressure_delay: Duration::from_millis(env_or("RECORDER_BACKPRESSURE_DELAY_MS", 1000)),
            cpu_sample_window: Duration::from_millis(env_or("RECORDER_CPU_SAMPLE_MS", 1000)),
            receive_error_backoff: defaults.receive_error_backoff,
            http_port: env_or("RECORDER_HTTP_PORT", defaults.http_port),
            static_dir: std::env::var("RECORDER_STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_dir),
            session_binary: std::env::var("RECORDER_SESSION_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.session_binary),
        }
    }
}

/// Everything the dispatcher process needs.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub settings: DispatcherSettings,
    pub queue: QueueConfig,
    pub video: VideoApiConfig,
}

impl DispatcherConfig {
    /// Create config from environment variables; missing credentials are fatal.
    pub fn from_env() -> WorkerResult<Self> {
        Ok(Self {
            settings: DispatcherSettings::from_env(),
            queue: QueueConfig::from_env().map_err(|e| WorkerError::config_error(e.to_string()))?,
            video: VideoApiConfig::from_env().map_err(|e| WorkerError::config_error(e.to_string()))?,
        })
    }
}

/// Recording session tunables.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Parent of every session's working directory
    pub work_dir: PathBuf,
    /// Hard cap on capture time
    pub hard_timeout: Duration,
    /// Interval of the level-triggered drain check
    pub drain_poll_interval: Duration,
    /// Identity the capture surface joins the room as
    pub identity: String,
    /// Page the capture surface loads
    pub capture_page_url: String,
    /// Capture bridge command line
    pub capture_bridge: String,
    /// Encoder binary
    pub encoder_program: String,
    /// Per-task upload retry policy
    pub upload_retry: UploadRetry,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./videos"),
            hard_timeout: SESSION_HARD_TIMEOUT,
            drain_poll_interval: Duration::from_secs(2),
            identity: "recording-bot".to_string(),
            capture_page_url: "http://localhost:3005".to_string(),
            capture_bridge: "roomrec-capture".to_string(),
            encoder_program: "ffmpeg".to_string(),
            upload_retry: UploadRetry::default(),
        }
    }
}

impl SessionSettings {
    /// Create settings from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            work_dir: std::env::var("RECORDER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            hard_timeout: Duration::from_secs(env_or("RECORDER_SESSION_TIMEOUT_SECS", 3600)),
            drain_poll_interval: Duration::from_millis(env_or("RECORDER_DRAIN_POLL_MS", 2000)),
            identity: env_string_or("RECORDER_IDENTITY", defaults.identity),
            capture_page_url: env_string_or("RECORDER_CAPTURE_PAGE_URL", defaults.capture_page_url),
            capture_bridge: env_string_or("RECORDER_CAPTURE_BRIDGE", defaults.capture_bridge),
            encoder_program: env_string_or("RECORDER_ENCODER", defaults.encoder_program),
            upload_retry: UploadRetry {
                max_retries: env_or("RECORDER_UPLOAD_MAX_RETRIES", 5),
                ..UploadRetry::default()
            },
        }
    }
}

/// Everything a recording session process needs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub settings: SessionSettings,
    pub storage: S3Config,
    pub video: VideoApiConfig,
}

impl SessionConfig {
    /// Create config from environment variables; missing credentials are fatal.
    pub fn from_env() -> WorkerResult<Self> {
        let settings = SessionSettings::from_env();
        if settings.identity.trim().is_empty() {
            return Err(WorkerError::config_error("RECORDER_IDENTITY is empty"));
        }
        Ok(Self {
            settings,
            storage: S3Config::from_env().map_err(|e| WorkerError::config_error(e.to_string()))?,
            video: VideoApiConfig::from_env().map_err(|e| WorkerError::config_error(e.to_string()))?,
        })
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string_or(name: &str, default: String) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default)
}

fn default_session_binary() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(SESSION_BINARY_NAME)))
        .unwrap_or_else(|| PathBuf::from(SESSION_BINARY_NAME))
}
