// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::{bail, Result};
use std::collections::HashSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bluetooth::{DeviceHandle, LivenessConfig, SessionConfig, DEFAULT_RFCOMM_CHANNEL};
use crate::medicine::Medicine;
use crate::sync::SyncConfig;

const APP_DIR: &str = "smartmed-link";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for the dispense log.
    #[serde(skip)]
    pub data_dir: PathBuf,

    /// Bluetooth settings.
    #[serde(default)]
    pub bluetooth: BluetoothConfig,

    /// Keep-alive settings.
    #[serde(default)]
    pub liveness: LivenessSettings,

    /// Acknowledgment deadlines for alarm sync.
    #[serde(default)]
    pub sync: SyncSettings,

    /// Medicine schedule pushed by `sync`.
    #[serde(default, rename = "medicine")]
    pub medicines: Vec<Medicine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Dispenser address, e.g. `98:D3:31:F5:2A:10`. Empty until paired.
    pub device_address: String,

    /// Name shown for the dispenser.
    pub device_name: String,

    pub rfcomm_channel: u8,

    pub connect_attempts: u32,
    pub connect_backoff_ms: u64,
    pub connect_timeout_ms: u64,

    pub stream_attempts: u32,
    pub stream_retry_ms: u64,

    /// Send `HELLO` after connecting.
    pub handshake: bool,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            device_address: String::new(),
            device_name: "HC-05".to_string(),
            rfcomm_channel: DEFAULT_RFCOMM_CHANNEL,
            connect_attempts: 3,
            connect_backoff_ms: 1000,
            connect_timeout_ms: 10_000,
            stream_attempts: 3,
            stream_retry_ms: 200,
            handshake: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessSettings {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub ack_timeout_ms: u64,
    pub alarm_ack_timeout_ms: u64,
    pub complete_timeout_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 3000,
            alarm_ack_timeout_ms: 5000,
            complete_timeout_ms: 10_000,
        }
    }
}

impl Config {
    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        std::fs::create_dir_all(&config_dir)?;

        let mut config = Self::load_from(&config_dir.join("config.toml"))?;

        // Set data directory
        config.data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(config)
    }

    /// Load from an explicit path, writing defaults there if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            let content = toml::to_string_pretty(&config)?;
            std::fs::write(path, content)?;
            Ok(config)
        }
    }

    /// Medicine names identify a medicine on the device, so they must be
    /// unique.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for medicine in &self.medicines {
            if !seen.insert(medicine.name()) {
                bail!("Medicine `{}` is listed more than once", medicine.name());
            }
        }
        Ok(())
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The configured dispenser, if an address is set.
    pub fn device(&self) -> Option<DeviceHandle> {
        let address = self.bluetooth.device_address.trim();
        if address.is_empty() {
            None
        } else {
            Some(DeviceHandle::new(address, self.bluetooth.device_name.clone()))
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let bt = &self.bluetooth;
        SessionConfig {
            connect_attempts: bt.connect_attempts.max(1),
            connect_backoff: Duration::from_millis(bt.connect_backoff_ms),
            connect_timeout: Duration::from_millis(bt.connect_timeout_ms),
            stream_attempts: bt.stream_attempts.max(1),
            stream_retry: Duration::from_millis(bt.stream_retry_ms),
            handshake: bt.handshake,
            liveness: LivenessConfig {
                enabled: self.liveness.enabled,
                interval: Duration::from_secs(self.liveness.interval_secs.max(1)),
            },
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            ack_timeout: Duration::from_millis(self.sync.ack_timeout_ms),
            alarm_ack_timeout: Duration::from_millis(self.sync.alarm_ack_timeout_ms),
            complete_timeout: Duration::from_millis(self.sync.complete_timeout_ms),
        }
    }
}
