//! Virtual memory pressure condition.

use async_trait::async_trait;
use sysinfo::System;
use tokio::sync::Mutex;

use super::{NapCondition, NaptimeError};

/// Signals nap time when memory usage meets or exceeds a ceiling percent.
pub struct MemoryPressure {
    ceiling_percent: f32,
    system: Mutex<System>,
}

impl MemoryPressure {
    pub fn new(ceiling_percent: f32) -> Self {
        Self {
            ceiling_percent,
            system: Mutex::new(System::new()),
        }
    }
}

#[async_trait]
impl NapCondition for MemoryPressure {
    fn name(&self) -> &str {
        "memory"
    }

    async fn is_nap_time(&self) -> Result<bool, NaptimeError> {
        let mut system = self.system.lock().await;
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return Err(NaptimeError::Sample(
                "total memory reported as zero".to_string(),
            ));
        }
        let used_percent = system.used_memory() as f32 / total as f32 * 100.0;
        if used_percent >= self.ceiling_percent {
            tracing::warn!(
                used_percent,
                ceiling = self.ceiling_percent,
                "memory usage over ceiling"
            );
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
        let condition = MemoryPressure::new(101.0);
        assert!(!condition.is_nap_time().await.unwrap());
    }

    #[tokio::test]
    async fn zero_ceiling_always_naps() {
        let condition = MemoryPressure::new(0.0);
        assert!(condition.is_nap_time().await.unwrap());
    }
}
