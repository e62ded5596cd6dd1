//! pinctrl backend - drives GPIO lines through the Raspberry Pi `pinctrl` tool
//!
//! Each step is one process invocation:
//! - `pinctrl set <line> op`       configure as output
//! - `pinctrl set <line> dh|dl`    drive high / low
//!
//! Optionally wrapped in `sudo` when the service user lacks GPIO access.

use super::{GpioBackend, Level};
use crate::error::{DriverError, WriteStep};
use crate::pins::PhysicalId;
use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, trace};

/// Shells out to `pinctrl` for every line operation
#[derive(Debug, Clone)]
pub struct PinctrlBackend {
    program: String,
    use_sudo: bool,
}

impl PinctrlBackend {
    pub fn new(program: impl Into<String>, use_sudo: bool) -> Self {
        Self {
            program: program.into(),
            use_sudo,
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg("-n").arg(&self.program);
            cmd
        } else {
            Command::new(&self.program)
        };

        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, pin: PhysicalId, step: WriteStep, mode: &str) -> Result<(), DriverError> {
        let line = pin.to_string();
        let args = ["set", line.as_str(), mode];
        trace!("{} {}", self.program, args.join(" "));

        let output = self
            .command(&args)
            .output()
            .await
            .map_err(|e| spawn_error(pin, step, e))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        debug!(
            "{} set {} {} failed ({:?}): {}",
            self.program,
            pin,
            mode,
            output.status.code(),
            stderr
        );
        Err(exit_error(pin, step, output.status.code(), stderr))
    }
}

impl Default for PinctrlBackend {
    fn default() -> Self {
        Self::new("pinctrl", true)
    }
}

fn level_arg(level: Level) -> &'static str {
    match level {
        Level::High => "dh",
        Level::Low => "dl",
    }
}

fn spawn_error(pin: PhysicalId, step: WriteStep, err: io::Error) -> DriverError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => DriverError::PermissionDenied { pin, step },
        _ => DriverError::Unavailable {
            pin,
            step,
            reason: err.to_string(),
        },
    }
}

fn exit_error(pin: PhysicalId, step: WriteStep, status: Option<i32>, stderr: String) -> DriverError {
    let lower = stderr.to_lowercase();
    if lower.contains("permission denied") || lower.contains("a password is required") {
        DriverError::PermissionDenied { pin, step }
    } else if lower.contains("invalid") || lower.contains("unknown gpio") {
        DriverError::InvalidLine { pin }
    } else {
        DriverError::Rejected {
            pin,
            step,
            status,
            stderr,
        }
    }
}

#[async_trait]
impl GpioBackend for PinctrlBackend {
    fn name(&self) -> &str {
        "pinctrl"
    }

    async fn configure_output(&self, pin: PhysicalId) -> Result<(), DriverError> {
        self.run(pin, WriteStep::Configure, "op").await
    }

    async fn set_level(&self, pin: PhysicalId, level: Level) -> Result<(), DriverError> {
        self.run(pin, WriteStep::SetLevel, level_arg(level)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_args() {
        assert_eq!(level_arg(Level::High), "dh");
        assert_eq!(level_arg(Level::Low), "dl");
    }

    #[test]
    fn test_exit_error_classification() {
        let pin = PhysicalId(18);

        let err = exit_error(pin, WriteStep::Configure, Some(1), "sudo: a password is required".into());
        assert_eq!(err, DriverError::PermissionDenied { pin, step: WriteStep::Configure });

        let err = exit_error(pin, WriteStep::SetLevel, Some(1), "Invalid GPIO '99'".into());
        assert_eq!(err, DriverError::InvalidLine { pin });

        let err = exit_error(pin, WriteStep::SetLevel, Some(2), "boom".into());
        assert!(matches!(err, DriverError::Rejected { status: Some(2), .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_program_passes() {
        // `true` ignores its arguments and exits 0
        let backend = PinctrlBackend::new("true", false);
        backend.configure_output(PhysicalId(18)).await.unwrap();
        backend.set_level(PhysicalId(18), Level::Low).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_program_is_rejected() {
        let backend = PinctrlBackend::new("false", false);
        let err = backend.set_level(PhysicalId(18), Level::High).await.unwrap_err();
        assert!(matches!(
            err,
            DriverError::Rejected { step: WriteStep::SetLevel, .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let backend = PinctrlBackend::new("definitely-not-a-real-pinctrl-binary", false);
        let err = backend.configure_output(PhysicalId(21)).await.unwrap_err();
        assert!(matches!(
            err,
            DriverError::Unavailable { step: WriteStep::Configure, .. }
        ));
    }
}
