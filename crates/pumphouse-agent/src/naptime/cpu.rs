//! CPU pressure condition.

use async_trait::async_trait;
use sysinfo::System;
use tokio::sync::Mutex;

use super::{NapCondition, NaptimeError};

/// Signals nap time when global CPU usage meets or exceeds a ceiling.
pub struct CpuPressure {
    ceiling_percent: f32,
    system: Mutex<System>,
}

impl CpuPressure {
    pub fn new(ceiling_percent: f32) -> Self {
        Self {
            ceiling_percent,
            system: Mutex::new(System::new()),
        }
    }
}

#[async_trait]
impl NapCondition for CpuPressure {
    fn name(&self) -> &str {
        "cpu"
    }

    // Usage is measured since the previous refresh, so the first tick after
    // startup reads low; the monitor interval dwarfs the minimum sampling
    // window.
    async fn is_nap_time(&self) -> Result<bool, NaptimeError> {
        let mut system = self.system.lock().await;
        system.refresh_cpu_usage();
        let usage = system.global_cpu_info().cpu_usage();
        if usage >= self.ceiling_percent {
            tracing::warn!(usage, ceiling = self.ceiling_percent, "cpu usage over ceiling");
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn impossible_ceiling_never_naps() {
        let condition = CpuPressure::new(101.0);
        assert!(!condition.is_nap_time().await.unwrap());
    }

    #[tokio::test]
    async fn zero_ceiling_naps_once_usage_is_sampled() {
        let condition = CpuPressure::new(0.0);
        // Any sampled value is >= 0, including the initial reading.
        assert!(condition.is_nap_time().await.unwrap());
    }
}
