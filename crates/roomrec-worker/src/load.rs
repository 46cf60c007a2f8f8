//! Host load sampling.

use std::time::Duration;

use async_trait::async_trait;
use sysinfo::{CpuRefreshKind, RefreshKind, System, MINIMUM_CPU_UPDATE_INTERVAL};

/// Source of the CPU utilization the admission gate is fed.
#[async_trait]
pub trait LoadSampler: Send + Sync {
    /// Global CPU utilization in percent (0-100).
    async fn cpu_utilization(&mut self) -> f32;
}

/// Samples global CPU usage with `sysinfo`.
///
/// Usage is the average over `window`, measured between two refreshes.
pub struct SysinfoSampler {
    system: System,
    window: Duration,
}

impl SysinfoSampler {
    pub fn new(window: Duration) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing().with_cpu_usage()),
        );
        Self {
            system,
            window: window.max(MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }
}

#[async_trait]
impl LoadSampler for SysinfoSampler {
    async fn cpu_utilization(&mut self) -> f32 {
        self.system.refresh_cpu_usage();
        tokio::time::sleep(self.window).await;
        self.system.refresh_cpu_usage();
        self.system.global_cpu_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sample_is_a_percentage() {
        let mut sampler = SysinfoSampler::new(Duration::from_millis(1));
        assert!(sampler.window >= MINIMUM_CPU_UPDATE_INTERVAL);

        let cpu = sampler.cpu_utilization().await;
        assert!((0.0..=100.0).contains(&cpu), "cpu {}", cpu);
    }
}
