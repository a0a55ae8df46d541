//! Configuration management for the serial MIDI bridge
//!
//! Handles loading and validating the optional YAML configuration file.
//! Every field has a default, so an empty file (or no file) is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::error::BridgeError;
use crate::midi::decoder::DEFAULT_SYSEX_CAPACITY;
use crate::midi::SysexOverflow;
use crate::router::{PortRouter, MAX_PORTS};

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// Serial device configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Host MIDI bus configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    /// Client name shown on the bus; ports are named "<name> In" / "<name> Out"
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

/// Bridge loop tunables
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// Number of logical ports multiplexed over the serial line (1-16)
    #[serde(default = "default_ports")]
    pub ports: u8,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Outbound quiet period after which the port is re-announced
    #[serde(default = "default_idle_reset_ms")]
    pub idle_reset_ms: u64,
    #[serde(default = "default_sysex_buffer_size")]
    pub sysex_buffer_size: usize,
    #[serde(default)]
    pub sysex_overflow: SysexOverflow,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ports: default_ports(),
            read_timeout_ms: default_read_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            idle_reset_ms: default_idle_reset_ms(),
            sysex_buffer_size: default_sysex_buffer_size(),
            sysex_overflow: SysexOverflow::default(),
        }
    }
}

impl BridgeConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn idle_reset(&self) -> Duration {
        Duration::from_millis(self.idle_reset_ms)
    }

    pub fn port_router(&self) -> crate::error::Result<PortRouter> {
        PortRouter::new(self.ports, self.idle_reset())
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.ports == 0 || self.ports > MAX_PORTS {
            return Err(BridgeError::InvalidConfig(format!(
                "bridge.ports must be 1..={}, got {}",
                MAX_PORTS, self.ports
            )));
        }
        if self.read_timeout_ms == 0 || self.poll_interval_ms == 0 || self.idle_reset_ms == 0 {
            return Err(BridgeError::InvalidConfig(
                "bridge timeouts must be non-zero".to_string(),
            ));
        }
        // F0, at least one data byte, F7
        if self.sysex_buffer_size < 3 {
            return Err(BridgeError::InvalidConfig(format!(
                "bridge.sysex_buffer_size must be at least 3, got {}",
                self.sysex_buffer_size
            )));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.serial.device.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "serial.device must not be empty".to_string(),
            ));
        }
        if self.serial.baud_rate == 0 {
            return Err(BridgeError::InvalidConfig(
                "serial.baud_rate must be non-zero".to_string(),
            ));
        }
        self.bridge.validate()
    }
}

// Default value functions
fn default_device() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_client_name() -> String { "ttymidi".to_string() }
fn default_ports() -> u8 { 1 }
fn default_read_timeout_ms() -> u64 { 1000 }
fn default_poll_interval_ms() -> u64 { 100 }
fn default_idle_reset_ms() -> u64 { 3000 }
fn default_sysex_buffer_size() -> usize { DEFAULT_SYSEX_CAPACITY }
