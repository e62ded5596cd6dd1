//! State management module - logical LED state per output
//!
//! Holds the authoritative on/off record for every output. Only the command
//! router writes to it; the record is what gets republished on reconnect.

mod store;
mod types;

pub use store::StateStore;
pub use types::{DeviceId, Output, OutputName, OutputState};
