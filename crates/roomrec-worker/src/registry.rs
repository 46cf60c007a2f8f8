//! Registry of running recording sessions.
//!
//! Owned by the dispatcher loop; it is the only record of work in flight
//! and shutdown completes only once it is empty.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use roomrec_queue::JobDescriptor;

use crate::metrics;

/// A spawned session process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub pid: u32,
    /// Dispatcher-local launch number; tells a reused pid apart
    pub launch_id: u64,
    pub room_name: String,
    pub tenant_id: String,
    pub started_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(pid: u32, launch_id: u64, job: &JobDescriptor) -> Self {
        Self {
            pid,
            launch_id,
            room_name: job.room_name().to_string(),
            tenant_id: job.tenant_id().to_string(),
            started_at: Utc::now(),
        }
    }
}

/// A session process that has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionExit {
    pub pid: u32,
    pub launch_id: u64,
    /// Exit code, `None` when killed by a signal or not observable
    pub code: Option<i32>,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<u32, SessionRecord>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Returns the record it displaced, if its pid
    /// was reused before the old exit was reaped.
    pub fn insert(&mut self, record: SessionRecord) -> Option<SessionRecord> {
        let displaced = self.sessions.insert(record.pid, record);
        metrics::set_active_sessions(self.sessions.len());
        displaced
    }

    /// Remove the record `exit` belongs to. An exit from an earlier launch
    /// under the same pid leaves the current record alone.
    pub fn remove(&mut self, exit: &SessionExit) -> Option<SessionRecord> {
        match self.sessions.get(&exit.pid) {
            Some(record) if record.launch_id == exit.launch_id => {}
            _ => return None,
        }
        let removed = self.sessions.remove(&exit.pid);
        metrics::set_active_sessions(self.sessions.len());
        removed
    }

    pub fn get(&self, pid: u32) -> Option<&SessionRecord> {
        self.sessions.get(&pid)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.sessions.keys().copied().collect();
        pids.sort_unstable();
        pids
    }
}
