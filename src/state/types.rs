//! Output identity and state type definitions
//!
//! Defines the devices, output roles and the `Output` pair that addresses one
//! LED, along with its logical state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// FPGA board the LED belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceId {
    Fpga1,
    Fpga2,
    Fpga3,
}

impl DeviceId {
    /// All devices, in address order
    pub fn all() -> &'static [DeviceId] {
        &[DeviceId::Fpga1, DeviceId::Fpga2, DeviceId::Fpga3]
    }

    /// Wire name used in bus addresses
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceId::Fpga1 => "fpga1",
            DeviceId::Fpga2 => "fpga2",
            DeviceId::Fpga3 => "fpga3",
        }
    }

    /// Parse a wire name (exact, lowercase)
    pub fn from_wire(raw: &str) -> Option<Self> {
        Self::all().iter().copied().find(|d| d.as_str() == raw)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of an LED on a board
///
/// The first three are per-user indicators, `Loaded` shows that a bitstream
/// is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputName {
    #[serde(rename = "dan")]
    Primary,
    #[serde(rename = "nate")]
    Secondary,
    #[serde(rename = "ben")]
    Tertiary,
    Loaded,
}

impl OutputName {
    /// All roles, in address order
    pub fn all() -> &'static [OutputName] {
        &[
            OutputName::Primary,
            OutputName::Secondary,
            OutputName::Tertiary,
            OutputName::Loaded,
        ]
    }

    /// Wire name used in bus addresses
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputName::Primary => "dan",
            OutputName::Secondary => "nate",
            OutputName::Tertiary => "ben",
            OutputName::Loaded => "loaded",
        }
    }

    /// Parse a wire name (exact, lowercase)
    pub fn from_wire(raw: &str) -> Option<Self> {
        Self::all().iter().copied().find(|n| n.as_str() == raw)
    }
}

impl fmt::Display for OutputName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One controllable LED, addressed by device and role
///
/// Ordering is device first, then role, which gives the deterministic order
/// used for full-state dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Output {
    pub device: DeviceId,
    pub name: OutputName,
}

impl Output {
    pub const fn new(device: DeviceId, name: OutputName) -> Self {
        Self { device, name }
    }

    /// Every output in address order (12 total)
    pub fn all() -> impl Iterator<Item = Output> {
        DeviceId::all().iter().flat_map(|device| {
            OutputName::all()
                .iter()
                .map(move |name| Output::new(*device, *name))
        })
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.name)
    }
}

/// Last-known logical state of one output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputState {
    pub output: Output,
    /// "LED appears lit", independent of signal polarity
    pub logical_on: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_outputs_in_address_order() {
        let outputs: Vec<Output> = Output::all().collect();
        assert_eq!(outputs.len(), 12);

        let mut sorted = outputs.clone();
        sorted.sort();
        assert_eq!(outputs, sorted);

        assert_eq!(outputs[0], Output::new(DeviceId::Fpga1, OutputName::Primary));
        assert_eq!(outputs[11], Output::new(DeviceId::Fpga3, OutputName::Loaded));
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(DeviceId::from_wire("fpga2"), Some(DeviceId::Fpga2));
        assert_eq!(DeviceId::from_wire("FPGA2"), None);
        assert_eq!(DeviceId::from_wire("fpga9"), None);
        assert_eq!(OutputName::from_wire("nate"), Some(OutputName::Secondary));
        assert_eq!(OutputName::from_wire("loaded"), Some(OutputName::Loaded));
        assert_eq!(OutputName::from_wire("bob"), None);

        let output = Output::new(DeviceId::Fpga3, OutputName::Tertiary);
        assert_eq!(output.to_string(), "fpga3/ben");
    }
}
