//! Error taxonomy for the command path and the bus connection
//!
//! Every error here is recoverable: commands that fail are dropped and
//! logged, connection failures feed the reconnect backoff.

use crate::pins::PhysicalId;
use crate::state::Output;
use thiserror::Error;

/// Malformed address or payload on an inbound message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("topic '{0}' is not a command address (expected fpga/command/<device>/<name>)")]
    UnexpectedTopic(String),

    #[error("payload '{0}' is not a boolean (expected true/false, 1/0, on/off)")]
    InvalidPayload(String),

    #[error("payload is not valid UTF-8")]
    NonUtf8Payload,
}

/// Reference to an output that is not part of the pin map
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no output '{name}' on device '{device}'")]
pub struct NotFound {
    pub device: String,
    pub name: String,
}

impl NotFound {
    pub fn new(device: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            name: name.into(),
        }
    }
}

impl From<Output> for NotFound {
    fn from(output: Output) -> Self {
        Self::new(output.device.as_str(), output.name.as_str())
    }
}

/// Step of a physical write that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStep {
    Configure,
    SetLevel,
}

impl std::fmt::Display for WriteStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteStep::Configure => write!(f, "configure"),
            WriteStep::SetLevel => write!(f, "set-level"),
        }
    }
}

/// Physical write failure reported by a GPIO backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("GPIO {pin} unavailable during {step}: {reason}")]
    Unavailable {
        pin: PhysicalId,
        step: WriteStep,
        reason: String,
    },

    #[error("permission denied on GPIO {pin} during {step}")]
    PermissionDenied { pin: PhysicalId, step: WriteStep },

    #[error("invalid GPIO line {pin}")]
    InvalidLine { pin: PhysicalId },

    #[error("GPIO {pin} {step} rejected (exit status {status:?}): {stderr}")]
    Rejected {
        pin: PhysicalId,
        step: WriteStep,
        status: Option<i32>,
        stderr: String,
    },
}

impl DriverError {
    /// Physical line the failure belongs to
    pub fn pin(&self) -> PhysicalId {
        match self {
            DriverError::Unavailable { pin, .. }
            | DriverError::PermissionDenied { pin, .. }
            | DriverError::InvalidLine { pin }
            | DriverError::Rejected { pin, .. } => *pin,
        }
    }
}

/// Bus connection failure; always followed by a backoff and a new attempt
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("broker refused connection: {0}")]
    Refused(String),

    #[error("broker rejected subscription to '{0}'")]
    SubscribeRejected(String),

    #[error("subscribe request could not be queued: {0}")]
    Subscribe(#[from] rumqttc::ClientError),

    #[error(transparent)]
    Transport(#[from] rumqttc::ConnectionError),
}

/// Reason an inbound command was dropped by the router
#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    NotFound(#[from] NotFound),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("write lane for {0} is closed")]
    LaneClosed(Output),

    #[error("router is shutting down")]
    ShuttingDown,
}
