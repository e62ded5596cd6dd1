//! Configuration management for FPGA LED GW
//!
//! Handles loading, parsing and validation of the YAML configuration file.
//! Every section is optional; a missing file section falls back to the
//! deployed defaults (local broker, `sudo pinctrl`).

use crate::bus::BusOptions;
use crate::router::RouterOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub reconnect: ReconnectConfig,
    pub gpio: GpioConfig,
    pub lanes: LaneConfig,
    pub logging: LoggingConfig,
    pub startup: StartupConfig,
}

/// MQTT broker connection
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    /// Publish failed writes on `fpga/error/<device>/<name>`
    pub publish_errors: bool,
}

/// Reconnect backoff bounds
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

/// GPIO write mechanism
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GpioConfig {
    pub program: String,
    pub use_sudo: bool,
}

/// Per-output write queues
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LaneConfig {
    pub queue_depth: usize,
}

/// Log output
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write logs to this file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// Hardware preparation before the bus connects
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StartupConfig {
    /// Drive every LED off so hardware matches the initial state
    pub drive_off: bool,
    /// Light each LED briefly, one after another
    pub lamp_test: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: 1883,
            client_id: default_client_id(),
            keep_alive_secs: 60,
            connect_timeout_secs: 5,
            publish_errors: false,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 2_000,
            max_delay_ms: 30_000,
        }
    }
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            program: "pinctrl".to_string(),
            use_sudo: true,
        }
    }
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            queue_depth: crate::router::DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: Some(PathBuf::from("/tmp/fpga_controller.log")),
        }
    }
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            drive_off: true,
            lamp_test: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config = Self::from_yaml(&contents)
            .with_context(|| format!("Failed to load config: {}", path))?;

        Ok(config)
    }

    /// Parse and validate YAML text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AppConfig = if contents.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.mqtt.host.trim().is_empty() {
            anyhow::bail!("mqtt.host cannot be empty");
        }
        if self.mqtt.port == 0 {
            anyhow::bail!("mqtt.port must be between 1 and 65535");
        }
        if self.mqtt.client_id.trim().is_empty() {
            anyhow::bail!("mqtt.client_id cannot be empty");
        }
        if self.mqtt.keep_alive_secs < 5 {
            anyhow::bail!(
                "mqtt.keep_alive_secs is {} (must be at least 5)",
                self.mqtt.keep_alive_secs
            );
        }
        if self.mqtt.connect_timeout_secs == 0 {
            anyhow::bail!("mqtt.connect_timeout_secs must be at least 1");
        }

        if self.reconnect.min_delay_ms < 500 {
            anyhow::bail!(
                "reconnect.min_delay_ms is {} (must be at least 500)",
                self.reconnect.min_delay_ms
            );
        }
        if self.reconnect.max_delay_ms < self.reconnect.min_delay_ms {
            anyhow::bail!(
                "reconnect.max_delay_ms ({}) is below reconnect.min_delay_ms ({})",
                self.reconnect.max_delay_ms,
                self.reconnect.min_delay_ms
            );
        }

        if self.gpio.program.trim().is_empty() {
            anyhow::bail!("gpio.program cannot be empty");
        }
        if self.lanes.queue_depth == 0 {
            anyhow::bail!("lanes.queue_depth must be at least 1");
        }

        Ok(())
    }

    /// Bus connection parameters
    pub fn bus_options(&self) -> BusOptions {
        BusOptions {
            host: self.mqtt.host.clone(),
            port: self.mqtt.port,
            client_id: self.mqtt.client_id.clone(),
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_secs),
            connect_timeout: Duration::from_secs(self.mqtt.connect_timeout_secs),
            publish_errors: self.mqtt.publish_errors,
            min_reconnect_delay: Duration::from_millis(self.reconnect.min_delay_ms),
            max_reconnect_delay: Duration::from_millis(self.reconnect.max_delay_ms),
        }
    }

    pub fn router_options(&self) -> RouterOptions {
        RouterOptions {
            queue_depth: self.lanes.queue_depth,
        }
    }
}

// Default value functions
fn default_mqtt_host() -> String { "localhost".to_string() }
fn default_client_id() -> String { "fpga-led-gw".to_string() }
