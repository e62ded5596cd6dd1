//! Pin registry - maps each output to its GPIO line
//!
//! The map is fixed at construction and never changes afterwards. It is
//! total over the 12 outputs and injective: no two outputs share a line.

use crate::error::NotFound;
use crate::state::{DeviceId, Output, OutputName};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// BCM GPIO line number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysicalId(pub u8);

impl fmt::Display for PhysicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deployed wiring: (device, role) -> GPIO line
const DEFAULT_PIN_MAP: &[(DeviceId, OutputName, u8)] = &[
    (DeviceId::Fpga1, OutputName::Primary, 18),
    (DeviceId::Fpga1, OutputName::Secondary, 19),
    (DeviceId::Fpga1, OutputName::Tertiary, 20),
    (DeviceId::Fpga1, OutputName::Loaded, 21),
    (DeviceId::Fpga2, OutputName::Primary, 22),
    (DeviceId::Fpga2, OutputName::Secondary, 23),
    (DeviceId::Fpga2, OutputName::Tertiary, 24),
    (DeviceId::Fpga2, OutputName::Loaded, 25),
    (DeviceId::Fpga3, OutputName::Primary, 26),
    (DeviceId::Fpga3, OutputName::Secondary, 27),
    (DeviceId::Fpga3, OutputName::Tertiary, 13),
    (DeviceId::Fpga3, OutputName::Loaded, 6),
];

/// Immutable (device, role) -> GPIO line map
#[derive(Debug, Clone)]
pub struct PinRegistry {
    pins: BTreeMap<Output, PhysicalId>,
}

impl PinRegistry {
    /// Build a registry from explicit entries
    ///
    /// Fails if an output is listed twice or two outputs share a line.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (Output, PhysicalId)>,
    ) -> anyhow::Result<Self> {
        let mut pins = BTreeMap::new();
        let mut lines = HashSet::new();

        for (output, pin) in entries {
            if !lines.insert(pin) {
                anyhow::bail!("GPIO {} is assigned to more than one output", pin);
            }
            if pins.insert(output, pin).is_some() {
                anyhow::bail!("output {} is mapped more than once", output);
            }
        }

        Ok(Self { pins })
    }

    /// Resolve raw wire names to an output and its line
    pub fn resolve(&self, device: &str, name: &str) -> Result<(Output, PhysicalId), NotFound> {
        let output = DeviceId::from_wire(device)
            .zip(OutputName::from_wire(name))
            .map(|(device, name)| Output::new(device, name))
            .ok_or_else(|| NotFound::new(device, name))?;

        let pin = self.physical_id(output)?;
        Ok((output, pin))
    }

    /// Line driving `output`
    pub fn physical_id(&self, output: Output) -> Result<PhysicalId, NotFound> {
        self.pins
            .get(&output)
            .copied()
            .ok_or_else(|| NotFound::from(output))
    }

    /// All mapped outputs in address order
    pub fn outputs(&self) -> impl Iterator<Item = Output> + '_ {
        self.pins.keys().copied()
    }

    /// All (output, line) pairs in address order
    pub fn iter(&self) -> impl Iterator<Item = (Output, PhysicalId)> + '_ {
        self.pins.iter().map(|(output, pin)| (*output, *pin))
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// One human-readable line per device, e.g. `FPGA1: DAN=18, NATE=19, ...`
    pub fn describe(&self) -> Vec<String> {
        DeviceId::all()
            .iter()
            .map(|device| {
                let pins = self
                    .iter()
                    .filter(|(output, _)| output.device == *device)
                    .map(|(output, pin)| format!("{}={}", output.name.as_str().to_uppercase(), pin))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}: {}", device.as_str().to_uppercase(), pins)
            })
            .collect()
    }
}

impl Default for PinRegistry {
    fn default() -> Self {
        let pins = DEFAULT_PIN_MAP
            .iter()
            .map(|(device, name, pin)| (Output::new(*device, *name), PhysicalId(*pin)))
            .collect();
        Self { pins }
    }
}
