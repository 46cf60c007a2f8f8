//! CPU admission gate.

/// CPU percentage at or above which new work is not polled for.
pub const DEFAULT_CPU_THRESHOLD: f32 = 50.0;

/// Whether the dispatcher may poll for work this cycle.
///
/// Shutdown keeps polling allowed; whether the loop continues at all is a
/// separate decision made by the dispatcher.
pub fn admit(cpu_utilization: f32, threshold: f32, shutting_down: bool) -> bool {
    cpu_utilization < threshold || shutting_down
}

/// Admission gate bound to a threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmissionGate {
    threshold: f32,
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(DEFAULT_CPU_THRESHOLD)
    }
}

impl AdmissionGate {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn admit(&self, cpu_utilization: f32, shutting_down: bool) -> bool {
        admit(cpu_utilization, self.threshold, shutting_down)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_at_and_above_threshold() {
        let gate = AdmissionGate::default();
        for cpu in [50.0, 50.1, 80.0, 100.0] {
            assert!(!gate.admit(cpu, false), "cpu {} admitted", cpu);
        }
    }

    #[test]
    fn test_admits_below_threshold() {
        let gate = AdmissionGate::default();
        for cpu in [0.0, 12.5, 49.9] {
            assert!(gate.admit(cpu, false), "cpu {} rejected", cpu);
        }
    }

    #[test]
    fn test_shutdown_still_admits() {
        let gate = AdmissionGate::new(50.0);
        assert!(gate.admit(99.0, true));
        assert!(admit(80.0, 50.0, true));
    }
}
