//! Structured logging setup.
//!
//! All binaries log through `tracing`. `LOG_FORMAT=json` switches to JSON
//! lines for production; otherwise output is human readable with ANSI colors.
//! `RUST_LOG` overrides the default directives.

use tracing::Span;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use roomrec_queue::JobDescriptor;

/// Directives applied on top of `RUST_LOG`.
pub const DEFAULT_DIRECTIVES: &[&str] = &["roomrec=info", "aws_smithy_runtime=warn", "hyper=warn"];

/// Whether logs should be emitted as JSON lines.
pub fn json_requested(value: Option<&str>) -> bool {
    value.map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false)
}

/// Install the global subscriber. Call once per process.
pub fn init_tracing() {
    let use_json = json_requested(std::env::var("LOG_FORMAT").ok().as_deref());

    let mut env_filter = EnvFilter::from_default_env();
    for directive in DEFAULT_DIRECTIVES {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Span wrapping everything a recording session logs.
pub fn session_span(job: &JobDescriptor, session_id: &str) -> Span {
    tracing::info_span!(
        "session",
        room = %job.room_name(),
        tenant = %job.tenant_id(),
        session_id = %session_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_switch() {
        assert!(json_requested(Some("json")));
        assert!(json_requested(Some("JSON")));
        assert!(!json_requested(Some("text")));
        assert!(!json_requested(None));
    }

    #[test]
    fn test_default_directives_parse() {
        for directive in DEFAULT_DIRECTIVES {
            assert!(directive.parse::<tracing_subscriber::filter::Directive>().is_ok());
        }
    }
}
