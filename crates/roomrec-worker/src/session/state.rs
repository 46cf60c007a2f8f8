//! Session lifecycle state.

use std::fmt;

use crate::error::{WorkerError, WorkerResult};

/// Phases of a recording session, in order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionPhase {
    #[default]
    Starting,
    Capturing,
    Closing,
    Draining,
    Done,
}

impl SessionPhase {
    fn next(self) -> Option<SessionPhase> {
        match self {
            SessionPhase::Starting => Some(SessionPhase::Capturing),
            SessionPhase::Capturing => Some(SessionPhase::Closing),
            SessionPhase::Closing => Some(SessionPhase::Draining),
            SessionPhase::Draining => Some(SessionPhase::Done),
            SessionPhase::Done => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Starting => "starting",
            SessionPhase::Capturing => "capturing",
            SessionPhase::Closing => "closing",
            SessionPhase::Draining => "draining",
            SessionPhase::Done => "done",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enforces strictly sequential phase transitions.
#[derive(Debug, Default)]
pub struct PhaseTracker {
    phase: SessionPhase,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Move to `to`, which must be the phase directly after the current one.
    pub fn advance(&mut self, to: SessionPhase) -> WorkerResult<()> {
        if self.phase.next() != Some(to) {
            return Err(WorkerError::session_fatal(format!(
                "invalid phase transition {} -> {}",
                self.phase, to
            )));
        }
        tracing::debug!("Session phase {} -> {}", self.phase, to);
        self.phase = to;
        Ok(())
    }
}

/// Why capturing ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The capture surface asked to end the session
    Requested,
    /// The capture surface went away
    CaptureEnded,
    /// The encoder stopped on its own
    EncoderExited,
    /// The hard cap was reached
    Timeout,
}

impl CloseReason {
    /// Only a forced close removes the recorder from the room.
    pub fn disconnects_identity(&self) -> bool {
        matches!(self, CloseReason::Timeout)
    }
}

/// The facts the drain check evaluates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TerminationState {
    pub encoder_exited: bool,
    pub files_remaining: usize,
    pub pending_uploads: usize,
}

impl TerminationState {
    /// No local files remain and no upload is outstanding.
    pub fn artifacts_drained(&self) -> bool {
        self.files_remaining == 0 && self.pending_uploads == 0
    }

    pub fn ready_to_exit(&self) -> bool {
        self.encoder_exited && self.artifacts_drained()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_transitions() {
        let mut tracker = PhaseTracker::new();
        assert_eq!(tracker.phase(), SessionPhase::Starting);

        for phase in [
            SessionPhase::Capturing,
            SessionPhase::Closing,
            SessionPhase::Draining,
            SessionPhase::Done,
        ] {
            tracker.advance(phase).unwrap();
            assert_eq!(tracker.phase(), phase);
        }
    }

    #[test]
    fn test_skipping_a_phase_is_rejected() {
        let mut tracker = PhaseTracker::new();
        assert!(tracker.advance(SessionPhase::Done).is_err());
        assert!(tracker.advance(SessionPhase::Closing).is_err());

        tracker.advance(SessionPhase::Capturing).unwrap();
        assert!(tracker.advance(SessionPhase::Starting).is_err());
        assert!(tracker.advance(SessionPhase::Draining).is_err());
        assert_eq!(tracker.phase(), SessionPhase::Capturing);
    }

    #[test]
    fn test_exit_requires_both_signals() {
        let mut state = TerminationState {
            encoder_exited: true,
            files_remaining: 1,
            pending_uploads: 0,
        };
        assert!(!state.ready_to_exit());

        state.files_remaining = 0;
        state.pending_uploads = 1;
        assert!(!state.artifacts_drained());
        assert!(!state.ready_to_exit());

        state.pending_uploads = 0;
        assert!(state.ready_to_exit());

        state.encoder_exited = false;
        assert!(state.artifacts_drained());
        assert!(!state.ready_to_exit());
    }

    #[test]
    fn test_only_timeout_disconnects() {
        assert!(CloseReason::Timeout.disconnects_identity());
        assert!(!CloseReason::Requested.disconnects_identity());
        assert!(!CloseReason::CaptureEnded.disconnects_identity());
        assert!(!CloseReason::EncoderExited.disconnects_identity());
    }
}
