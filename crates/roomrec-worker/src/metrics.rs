//! Metrics recorded by the dispatcher and sessions.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Metric names as constants for consistency.
pub mod names {
    pub const MESSAGES_TOTAL: &str = "recorder_messages_total";
    pub const ADMISSION_SKIPS_TOTAL: &str = "recorder_admission_skips_total";
    pub const ACTIVE_SESSIONS: &str = "recorder_active_sessions";
    pub const SESSION_EXITS_TOTAL: &str = "recorder_session_exits_total";
    pub const UPLOADS_TOTAL: &str = "recorder_uploads_total";
}

/// Install the Prometheus recorder and return its render handle.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Count one handled queue message by outcome.
pub fn record_message(outcome: &'static str) {
    counter!(names::MESSAGES_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_admission_skip() {
    counter!(names::ADMISSION_SKIPS_TOTAL).increment(1);
}

pub fn set_active_sessions(count: usize) {
    gauge!(names::ACTIVE_SESSIONS).set(count as f64);
}

pub fn record_session_exit(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(names::SESSION_EXITS_TOTAL, "status" => status).increment(1);
}

/// Count one upload attempt chain by outcome.
pub fn record_upload(outcome: &'static str) {
    counter!(names::UPLOADS_TOTAL, "outcome" => outcome).increment(1);
}
