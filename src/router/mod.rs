//! Router module - turns bus commands into LED writes
//!
//! The CommandRouter is the central orchestrator that:
//! - Parses inbound command addresses and payloads
//! - Resolves them against the pin registry
//! - Queues the write on the output's lane (one worker per GPIO line)
//! - Commits successful writes to the state store and emits status events
//! - Replays the full state when the bus (re)connects

mod command;
mod dispatch;
mod lane;


pub use command::{
    error_topic, format_payload, parse_payload, status_topic, InboundCommand, COMMAND_FILTER,
};

#[cfg(test)]
pub(crate) use command::command_topic;

use crate::drivers::OutputDriver;
use crate::pins::PinRegistry;
use crate::state::{Output, OutputState, StateStore};
use lane::{LaneCommand, WriteLane};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Default depth of each output's write queue
pub const DEFAULT_QUEUE_DEPTH: usize = 32;

/// Capacity of the router -> bus event channel
const OUTBOUND_CAPACITY: usize = 256;

/// Event the router hands to the bus for publishing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Committed logical state of one output
    Status(OutputState),
    /// Write that failed; the state store was not touched
    Fault {
        output: Output,
        requested: bool,
        error: String,
    },
}

#[derive(Serialize)]
struct FaultPayload<'a> {
    requested: bool,
    error: &'a str,
}

impl Outbound {
    pub fn output(&self) -> Output {
        match self {
            Outbound::Status(state) => state.output,
            Outbound::Fault { output, .. } => *output,
        }
    }

    /// Bus address for this event
    pub fn topic(&self) -> String {
        match self {
            Outbound::Status(state) => status_topic(state.output),
            Outbound::Fault { output, .. } => error_topic(*output),
        }
    }

    /// Wire payload for this event
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Outbound::Status(state) => format_payload(state.logical_on).as_bytes().to_vec(),
            Outbound::Fault {
                requested, error, ..
            } => serde_json::to_vec(&FaultPayload {
                requested: *requested,
                error,
            })
            .unwrap_or_default(),
        }
    }
}

/// Router tuning
#[derive(Debug, Clone, Copy)]
pub struct RouterOptions {
    /// Commands buffered per output before the delivery loop waits
    pub queue_depth: usize,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// Routes bus commands to GPIO writes and mirrors the result
pub struct CommandRouter {
    /// Fixed output -> line map
    pub(crate) registry: Arc<PinRegistry>,
    /// Authoritative logical state
    pub(crate) store: StateStore,
    /// Write queue per output; each lane holds a sender for bus events
    pub(crate) lanes: HashMap<Output, mpsc::Sender<LaneCommand>>,
    /// Cleared once shutdown starts; inbound commands are refused afterwards
    pub(crate) accepting: AtomicBool,
}

impl CommandRouter {
    /// Create a router and spawn one write lane per mapped output
    ///
    /// Must be called from within a Tokio runtime. Returns the receiver for
    /// outbound events, to be handed to the bus.
    pub fn new(
        registry: PinRegistry,
        driver: OutputDriver,
        options: RouterOptions,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (events, events_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let store = StateStore::new(registry.outputs());
        let depth = options.queue_depth.max(1);

        let lanes = registry
            .iter()
            .map(|(output, pin)| {
                let tx = WriteLane::spawn(
                    output,
                    pin,
                    driver.clone(),
                    store.clone(),
                    events.clone(),
                    depth,
                );
                (output, tx)
            })
            .collect();

        info!(
            "Router initialized: {} outputs via '{}' backend (queue depth {})",
            registry.len(),
            driver.backend_name(),
            depth
        );

        let router = Self {
            registry: Arc::new(registry),
            store,
            lanes,
            accepting: AtomicBool::new(true),
        };
        (router, events_rx)
    }

    /// Read handle on the state store
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn registry(&self) -> &PinRegistry {
        &self.registry
    }
}
