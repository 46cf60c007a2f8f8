//! Spawning recording sessions as child processes.

use std::path::PathBuf;
use std::process::Stdio;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use roomrec_queue::JobDescriptor;

use crate::error::{WorkerError, WorkerResult};

/// A session process that was started.
pub struct LaunchedSession {
    pub pid: u32,
    /// Resolves with the exit code once the process ends
    pub exit: BoxFuture<'static, Option<i32>>,
}

impl std::fmt::Debug for LaunchedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedSession")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Starts one isolated session per admitted job.
pub trait SessionLauncher: Send + Sync {
    fn launch(&self, job: &JobDescriptor) -> WorkerResult<LaunchedSession>;
}

/// Runs the session binary with `<room> <tenant>` arguments.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    binary: PathBuf,
}

impl ProcessLauncher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl SessionLauncher for ProcessLauncher {
    fn launch(&self, job: &JobDescriptor) -> WorkerResult<LaunchedSession> {
        let mut command = Command::new(&self.binary);
        command
            .arg(job.room_name())
            .arg(job.tenant_id())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group so a terminal Ctrl-C reaches only the dispatcher.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| WorkerError::spawn_failed(format!("{}: {}", self.binary.display(), e)))?;

        let pid = child
            .id()
            .ok_or_else(|| WorkerError::spawn_failed("session exited before its pid was read"))?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(pid, stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(pid, stderr));
        }

        info!(pid, room = %job.room_name(), "Spawned recording session");

        let exit = async move {
            match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(pid, "Failed waiting for session: {}", e);
                    None
                }
            }
        }
        .boxed();

        Ok(LaunchedSession { pid, exit })
    }
}

/// Forward a child's output lines into our log.
async fn forward_output<R>(pid: u32, stream: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: "roomrec::session", pid, "{}", line);
    }
}
