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

//! Tasmota OTA - firmware update manager for Tasmota devices
//!
//! Tracks the latest Tasmota release on GitHub, works out a safe (possibly
//! staged) upgrade path for each device and pushes the upgrade over MQTT,
//! following every update until the device reports back with a new version.

pub mod config;
pub mod daemon;
pub mod device;
pub mod error;
pub mod events;
pub mod installer;
pub mod lifecycle;
pub mod release;
pub mod release_cache;
pub mod release_checker;
pub mod topics;
pub mod transport;
pub mod upgrade_path;
pub mod version;

pub use config::Config;
pub use device::FirmwareDevice;
pub use error::UpdateError;
pub use release::ReleaseInfo;
pub use release_cache::ReleaseCache;
pub use upgrade_path::{UpgradeTarget, next_target};
pub use version::{SemanticVersion, version_from_tag};
