//! Host resource sampling for the health monitor.

use std::sync::Mutex;

use sysinfo::System;

/// Point-in-time host utilisation figures, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSample {
    /// Aggregate CPU utilisation across all cores.
    pub cpu_pct: f32,
    /// Used physical memory as a share of total.
    pub memory_pct: f32,
}

/// Source of host utilisation samples.
///
/// The monitor depends on this trait rather than on `sysinfo` directly so
/// tests can script pressure scenarios.
pub trait ResourceSampler: Send + Sync {
    /// Take a fresh utilisation sample.
    fn sample(&self) -> ResourceSample;
}

/// Sampler backed by the `sysinfo` crate.
pub struct SystemSampler {
    system: Mutex<System>,
}

impl SystemSampler {
    /// Construct a sampler over the local host.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SystemSampler {
    fn sample(&self) -> ResourceSample {
        let Ok(mut system) = self.system.lock() else {
            return ResourceSample::default();
        };
        system.refresh_cpu_usage();
        system.refresh_memory();

        let cpu_pct = system.global_cpu_usage();
        let total = system.total_memory();
        #[allow(clippy::cast_precision_loss)]
        let memory_pct = if total == 0 {
            0.0
        } else {
            (system.used_memory() as f64 / total as f64 * 100.0) as f32
        };
        ResourceSample {
            cpu_pct,
            memory_pct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_sampler_reports_bounded_memory() {
        let sampler = SystemSampler::new();
        let sample = sampler.sample();
        assert!(sample.memory_pct >= 0.0);
        assert!(sample.memory_pct <= 100.0);
    }
}
