// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of Tasmota OTA.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Configuration module

use crate::error::{Result, UpdateError};
use chrono::TimeDelta;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "tasmota-ota.toml";
pub const MQTT_PASSWORD_ENV: &str = "TASMOTA_OTA_MQTT_PASSWORD";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub release: ReleaseSettings,
    #[serde(default)]
    pub update: UpdateSettings,
    #[serde(default)]
    pub devices: Vec<DeviceSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttSettings {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseSettings {
    /// Override for testing against a mock server
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_repo")]
    pub repo: String,
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSettings {
    /// Give up on an in-flight update after this long
    #[serde(default = "default_update_timeout_secs")]
    pub timeout_secs: u64,
    /// Install the next hop automatically when one is available
    #[serde(default)]
    pub auto_install: bool,
    /// Check for timed out updates without waiting for a status report (0 = off)
    #[serde(default)]
    pub watchdog_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceSettings {
    /// Tasmota `%topic%` of the device
    pub topic: String,
    #[serde(default)]
    pub name: Option<String>,
}

fn default_mqtt_host() -> String {
    "localhost".to_owned()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "tasmota-ota".to_owned()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_owned()
}

fn default_repo() -> String {
    "arendst/Tasmota".to_owned()
}

fn default_check_interval_secs() -> u64 {
    24 * 3600
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_update_timeout_secs() -> u64 {
    300
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

impl MqttSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Password from the config file, falling back to the environment
    pub fn resolved_password(&self) -> Option<String> {
        self.password
            .clone()
            .or_else(|| std::env::var(MQTT_PASSWORD_ENV).ok())
    }
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            repo: default_repo(),
            check_interval_secs: default_check_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl ReleaseSettings {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn latest_release_url(&self) -> String {
        format!(
            "{}/repos/{}/releases/latest",
            self.api_base_url.trim_end_matches('/'),
            self.repo
        )
    }
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_update_timeout_secs(),
            auto_install: false,
            watchdog_interval_secs: 0,
        }
    }
}

impl UpdateSettings {
    pub fn timeout(&self) -> TimeDelta {
        i64::try_from(self.timeout_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }

    pub fn watchdog_interval(&self) -> Option<Duration> {
        (self.watchdog_interval_secs > 0).then(|| Duration::from_secs(self.watchdog_interval_secs))
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `path` if it exists, otherwise use defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::info!("Config {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| UpdateError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.mqtt.host.trim().is_empty() {
            return Err(UpdateError::Config("mqtt.host must be set".to_owned()));
        }
        if self.mqtt.client_id.trim().is_empty() {
            return Err(UpdateError::Config("mqtt.client_id must be set".to_owned()));
        }
        if self.release.check_interval_secs == 0 {
            return Err(UpdateError::Config(
                "release.check_interval_secs must be greater than 0".to_owned(),
            ));
        }
        if self.release.fetch_timeout_secs == 0 {
            return Err(UpdateError::Config(
                "release.fetch_timeout_secs must be greater than 0".to_owned(),
            ));
        }
        if self.update.timeout_secs == 0 {
            return Err(UpdateError::Config(
                "update.timeout_secs must be greater than 0".to_owned(),
            ));
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            let topic = device.topic.as_str();
            if topic.is_empty()
                || topic.contains(|c: char| c.is_whitespace() || matches!(c, '/' | '+' | '#'))
            {
                return Err(UpdateError::Config(format!(
                    "invalid device topic '{topic}'"
                )));
            }
            if !seen.insert(topic) {
                return Err(UpdateError::Config(format!(
                    "duplicate device topic '{topic}'"
                )));
            }
        }

        Ok(())
    }
}
