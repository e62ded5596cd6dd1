//! Output drivers - the only code allowed to touch GPIO lines
//!
//! `OutputDriver` turns a logical on/off into the two physical steps every
//! write needs (configure the line as output, then drive its level) on top
//! of a pluggable `GpioBackend`.
//!
//! The LED driver stage (UDN2981A) sources current when its input is low, so
//! the level is always the inverse of the logical state:
//! - logical on  -> line LOW
//! - logical off -> line HIGH

use crate::error::DriverError;
use crate::pins::PhysicalId;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub mod console;
pub mod pinctrl;

pub use console::{ConsoleBackend, LineOp};
pub use pinctrl::PinctrlBackend;

/// Electrical level driven onto a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    High,
    Low,
}

impl Level {
    /// Level that makes the LED show `logical_on`
    pub fn for_logical(logical_on: bool) -> Self {
        if logical_on {
            Level::Low
        } else {
            Level::High
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::High => write!(f, "HIGH"),
            Level::Low => write!(f, "LOW"),
        }
    }
}

/// Backend trait - one implementation per way of reaching the GPIO lines
///
/// Both steps may fail independently. Implementations must be cheap to call
/// repeatedly: configuration is re-applied on every write because the GPIO
/// block can be reset behind our back.
#[async_trait]
pub trait GpioBackend: Send + Sync {
    /// Backend name for logs (e.g., "pinctrl", "console")
    fn name(&self) -> &str;

    /// Configure `pin` as an output
    async fn configure_output(&self, pin: PhysicalId) -> Result<(), DriverError>;

    /// Drive `pin` to `level`
    async fn set_level(&self, pin: PhysicalId, level: Level) -> Result<(), DriverError>;
}

/// Polarity-aware writer over a `GpioBackend`
#[derive(Clone)]
pub struct OutputDriver {
    backend: Arc<dyn GpioBackend>,
}

impl OutputDriver {
    pub fn new(backend: Arc<dyn GpioBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Write a logical state to `pin`
    ///
    /// Always configures the line before setting the level. A failure in
    /// either step fails the whole write.
    pub async fn write(&self, pin: PhysicalId, logical_on: bool) -> Result<(), DriverError> {
        let level = Level::for_logical(logical_on);

        self.backend.configure_output(pin).await?;
        self.backend.set_level(pin, level).await?;

        debug!(
            "GPIO {} -> {} (LED {})",
            pin,
            level,
            if logical_on { "ON" } else { "OFF" }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WriteStep;
    use proptest::prelude::*;

    fn driver_with_console() -> (OutputDriver, Arc<ConsoleBackend>) {
        let backend = Arc::new(ConsoleBackend::new());
        (OutputDriver::new(backend.clone()), backend)
    }

    #[tokio::test]
    async fn test_write_configures_then_sets_inverted_level() {
        let (driver, backend) = driver_with_console();

        driver.write(PhysicalId(18), true).await.unwrap();
        driver.write(PhysicalId(18), false).await.unwrap();

        assert_eq!(
            backend.history(),
            vec![
                LineOp::Configure(PhysicalId(18)),
                LineOp::SetLevel(PhysicalId(18), Level::Low),
                LineOp::Configure(PhysicalId(18)),
                LineOp::SetLevel(PhysicalId(18), Level::High),
            ]
        );
    }

    #[tokio::test]
    async fn test_configure_failure_skips_level() {
        let (driver, backend) = driver_with_console();
        backend.fail_configure(PhysicalId(19));

        let err = driver.write(PhysicalId(19), true).await.unwrap_err();
        assert_eq!(err.pin(), PhysicalId(19));
        assert!(backend.levels_for(PhysicalId(19)).is_empty());
    }

    #[tokio::test]
    async fn test_level_failure_after_configure_is_reported() {
        let (driver, backend) = driver_with_console();
        backend.fail_set_level(PhysicalId(20));

        let err = driver.write(PhysicalId(20), false).await.unwrap_err();
        match err {
            DriverError::Unavailable { step, .. } => assert_eq!(step, WriteStep::SetLevel),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(backend.history(), vec![LineOp::Configure(PhysicalId(20))]);
    }

    proptest! {
        #[test]
        fn prop_level_is_negation_of_logical(pin in 0u8..28, logical_on in any::<bool>()) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (driver, backend) = driver_with_console();

            rt.block_on(driver.write(PhysicalId(pin), logical_on)).unwrap();

            let levels = backend.levels_for(PhysicalId(pin));
            prop_assert_eq!(levels.len(), 1);
            prop_assert_eq!(levels[0] == Level::Low, logical_on);
        }
    }
}
