//! Upload retry policy.
//!
//! A put is retried with doubling delays. Once `max_retries` is spent the
//! task gives up and leaves its file on disk; the drain rescan starts a
//! fresh task for it, so an artifact keeps being retried until it lands.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadRetry {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each further one
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for UploadRetry {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl UploadRetry {
    /// Total attempts one task makes before giving up.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry `n` (1-based).
    fn backoff(&self, n: u32) -> Duration {
        let factor = 1u32.checked_shl(n.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `put` until it succeeds or the retries are spent.
    pub async fn run<F, Fut, T, E>(&self, mut put: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut retries = 0;
        loop {
            match put().await {
                Ok(value) => return Ok(value),
                Err(e) if retries < self.max_retries => {
                    retries += 1;
                    let delay = self.backoff(retries);
                    debug!(
                        "Put failed, retry {}/{} in {:?}: {}",
                        retries, self.max_retries, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Consecutive failures of one repeated operation.
///
/// Only the first `logged` failures in a row are worth a log line.
#[derive(Debug)]
pub struct FailureStreak {
    count: u32,
    logged: u32,
}

impl FailureStreak {
    pub fn new(logged: u32) -> Self {
        Self { count: 0, logged }
    }

    /// Count a failure. Returns whether it should be logged.
    pub fn failed(&mut self) -> bool {
        self.count += 1;
        if self.count == self.logged + 1 {
            warn!("{} failures in a row, logging the rest at debug", self.logged);
        }
        self.count <= self.logged
    }

    pub fn succeeded(&mut self) {
        if self.count > self.logged {
            debug!("Recovered after {} consecutive failures", self.count);
        }
        self.count = 0;
    }
}
