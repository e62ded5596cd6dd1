//! Console backend - logs line operations instead of touching hardware
//!
//! Used for `--dry-run` and as the recording stub in tests. Every operation
//! is kept in an in-memory history and individual lines can be told to fail.

use super::{GpioBackend, Level};
use crate::error::{DriverError, WriteStep};
use crate::pins::PhysicalId;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::time::Duration;
use tracing::info;

/// One recorded line operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOp {
    Configure(PhysicalId),
    SetLevel(PhysicalId, Level),
}

/// In-memory GPIO backend with fault injection
pub struct ConsoleBackend {
    history: Mutex<Vec<LineOp>>,
    failing_configure: Mutex<HashSet<PhysicalId>>,
    failing_level: Mutex<HashSet<PhysicalId>>,
    /// Simulated latency of each operation
    latency: Option<Duration>,
}

impl ConsoleBackend {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(Vec::new()),
            failing_configure: Mutex::new(HashSet::new()),
            failing_level: Mutex::new(HashSet::new()),
            latency: None,
        }
    }

    /// Delay every operation by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make "configure as output" fail for `pin`
    pub fn fail_configure(&self, pin: PhysicalId) {
        self.failing_configure.lock().insert(pin);
    }

    /// Make "set level" fail for `pin`
    pub fn fail_set_level(&self, pin: PhysicalId) {
        self.failing_level.lock().insert(pin);
    }

    /// Clear all injected faults
    pub fn heal(&self) {
        self.failing_configure.lock().clear();
        self.failing_level.lock().clear();
    }

    /// All recorded operations in call order
    pub fn history(&self) -> Vec<LineOp> {
        self.history.lock().clone()
    }

    /// Levels successfully driven onto `pin`, in call order
    pub fn levels_for(&self, pin: PhysicalId) -> Vec<Level> {
        self.history
            .lock()
            .iter()
            .filter_map(|op| match op {
                LineOp::SetLevel(p, level) if *p == pin => Some(*level),
                _ => None,
            })
            .collect()
    }

    /// Number of successful level writes across all lines
    pub fn write_count(&self) -> usize {
        self.history
            .lock()
            .iter()
            .filter(|op| matches!(op, LineOp::SetLevel(..)))
            .count()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for ConsoleBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GpioBackend for ConsoleBackend {
    fn name(&self) -> &str {
        "console"
    }

    async fn configure_output(&self, pin: PhysicalId) -> Result<(), DriverError> {
        self.simulate_latency().await;

        if self.failing_configure.lock().contains(&pin) {
            return Err(DriverError::Unavailable {
                pin,
                step: WriteStep::Configure,
                reason: "simulated fault".to_string(),
            });
        }

        self.history.lock().push(LineOp::Configure(pin));
        Ok(())
    }

    async fn set_level(&self, pin: PhysicalId, level: Level) -> Result<(), DriverError> {
        self.simulate_latency().await;

        if self.failing_level.lock().contains(&pin) {
            return Err(DriverError::Unavailable {
                pin,
                step: WriteStep::SetLevel,
                reason: "simulated fault".to_string(),
            });
        }

        self.history.lock().push(LineOp::SetLevel(pin, level));
        info!("🖥️  [console] GPIO {} -> {}", pin, level);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_console_backend_records_and_heals() {
        let backend = ConsoleBackend::new();
        backend.fail_set_level(PhysicalId(6));

        backend.configure_output(PhysicalId(6)).await.unwrap();
        assert!(backend.set_level(PhysicalId(6), Level::Low).await.is_err());
        assert_eq!(backend.write_count(), 0);

        backend.heal();
        backend.set_level(PhysicalId(6), Level::Low).await.unwrap();
        assert_eq!(backend.levels_for(PhysicalId(6)), vec![Level::Low]);
        assert_eq!(backend.write_count(), 1);

        backend.clear_history();
        assert!(backend.history().is_empty());
    }
}
