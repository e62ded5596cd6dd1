//! FPGA LED GW - MQTT gateway for the FPGA status LEDs
//!
//! Listens on `fpga/command/<device>/<name>`, drives the matching GPIO line
//! through the UDN2981A driver stage and mirrors the committed state on
//! `fpga/status/<device>/<name>`.

pub mod bus;
pub mod config;
pub mod drivers;
pub mod error;
pub mod pins;
pub mod router;
pub mod state;
