//! StateStore - In-memory logical state of every output
//!
//! The set of outputs is fixed at construction. Each output owns its own
//! slot lock, so writes to different outputs never contend.

use super::types::{Output, OutputState};
use crate::error::NotFound;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

type SlotMap = BTreeMap<Output, Mutex<bool>>;

/// Last-known logical state per output
///
/// Cloning the store clones the handle; all clones share the same slots.
#[derive(Clone)]
pub struct StateStore {
    slots: Arc<SlotMap>,
}

impl StateStore {
    /// Create a store holding `outputs`, every one initialized to off
    pub fn new(outputs: impl IntoIterator<Item = Output>) -> Self {
        let slots = outputs
            .into_iter()
            .map(|output| (output, Mutex::new(false)))
            .collect();

        Self {
            slots: Arc::new(slots),
        }
    }

    /// Current logical state of `output`
    pub fn get(&self, output: Output) -> Result<bool, NotFound> {
        self.slots
            .get(&output)
            .map(|slot| *slot.lock())
            .ok_or_else(|| NotFound::from(output))
    }

    /// Record a new logical state and return the previous one
    pub fn set(&self, output: Output, logical_on: bool) -> Result<bool, NotFound> {
        let slot = self
            .slots
            .get(&output)
            .ok_or_else(|| NotFound::from(output))?;

        let mut value = slot.lock();
        Ok(std::mem::replace(&mut *value, logical_on))
    }

    /// Snapshot of every output, ordered by device then role
    pub fn get_all(&self) -> Vec<OutputState> {
        self.slots
            .iter()
            .map(|(output, slot)| OutputState {
                output: *output,
                logical_on: *slot.lock(),
            })
            .collect()
    }

    /// Number of tracked outputs
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DeviceId, OutputName};

    fn full_store() -> StateStore {
        StateStore::new(Output::all())
    }

    #[test]
    fn test_starts_all_off() {
        let store = full_store();
        assert_eq!(store.len(), 12);
        assert!(store.get_all().iter().all(|s| !s.logical_on));
    }

    #[test]
    fn test_set_returns_previous() {
        let store = full_store();
        let output = Output::new(DeviceId::Fpga2, OutputName::Loaded);

        assert_eq!(store.set(output, true).unwrap(), false);
        assert_eq!(store.set(output, true).unwrap(), true);
        assert_eq!(store.set(output, false).unwrap(), true);
        assert!(!store.get(output).unwrap());
    }

    #[test]
    fn test_unknown_output_is_not_found() {
        let only_fpga1 = Output::all().filter(|o| o.device == DeviceId::Fpga1);
        let store = StateStore::new(only_fpga1);
        let missing = Output::new(DeviceId::Fpga3, OutputName::Primary);

        let err = store.get(missing).unwrap_err();
        assert_eq!(err.device, "fpga3");
        assert_eq!(err.name, "dan");
        assert!(store.set(missing, true).is_err());
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_get_all_is_ordered() {
        let reversed: Vec<Output> = Output::all().collect::<Vec<_>>().into_iter().rev().collect();
        let store = StateStore::new(reversed);
        store
            .set(Output::new(DeviceId::Fpga1, OutputName::Secondary), true)
            .unwrap();

        let all = store.get_all();
        let outputs: Vec<Output> = all.iter().map(|s| s.output).collect();
        assert_eq!(outputs, Output::all().collect::<Vec<_>>());
        assert!(all[1].logical_on);
        assert_eq!(all.iter().filter(|s| s.logical_on).count(), 1);
    }

    #[test]
    fn test_clones_share_slots() {
        let store = full_store();
        let handle = store.clone();
        let output = Output::new(DeviceId::Fpga3, OutputName::Tertiary);

        handle.set(output, true).unwrap();
        assert!(store.get(output).unwrap());
    }
}
