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

//! Tasmota MQTT topic layout
//!
//! Default full topic is `%prefix%/%topic%/`:
//! - `cmnd/<topic>/<command>`: commands to the device
//! - `stat/<topic>/STATUS2`: firmware status (`{"StatusFWR":{"Version":..}}`)
//! - `tele/<topic>/INFO1`: sent after boot, carries the running version
//! - `tele/<topic>/LWT`: availability (`Online` / `Offline`)

use serde_json::Value;

/// Something a device told us
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceMessage {
    Availability(bool),
    FirmwareVersion(String),
}

pub fn command_topic(device: &str, command: &str) -> String {
    format!("cmnd/{device}/{command}")
}

/// Status topics of every device; the device is taken from the matched topic
pub const STATUS_SUBSCRIPTIONS: [&str; 3] = ["tele/+/LWT", "stat/+/STATUS2", "tele/+/INFO1"];

/// Parse an inbound message into `(device, message)`
pub fn parse_message(topic: &str, payload: &[u8]) -> Option<(String, DeviceMessage)> {
    let mut parts = topic.splitn(3, '/');
    let prefix = parts.next()?;
    let device = parts.next()?;
    let suffix = parts.next()?;

    let message = match (prefix, suffix) {
        ("tele", "LWT") => match String::from_utf8_lossy(payload).trim() {
            "Online" => DeviceMessage::Availability(true),
            "Offline" => DeviceMessage::Availability(false),
            other => {
                tracing::debug!("Unknown LWT payload from {device}: {other}");
                return None;
            }
        },
        ("stat", "STATUS2") => {
            let json: Value = serde_json::from_slice(payload).ok()?;
            DeviceMessage::FirmwareVersion(json_str(&json, &["StatusFWR", "Version"])?)
        }
        ("tele", "INFO1") => {
            let json: Value = serde_json::from_slice(payload).ok()?;
            // Tasmota 9.x and later nest the fields under "Info1"
            let version = json_str(&json, &["Info1", "Version"])
                .or_else(|| json_str(&json, &["Version"]))?;
            DeviceMessage::FirmwareVersion(version)
        }
        _ => return None,
    };

    Some((device.to_owned(), message))
}

fn json_str(json: &Value, path: &[&str]) -> Option<String> {
    path.iter()
        .try_fold(json, |value, key| value.get(key))?
        .as_str()
        .map(str::to_owned)
}
