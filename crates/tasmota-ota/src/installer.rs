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

//! Sends the OTA upgrade command to a device

use crate::error::{Result, UpdateError};
use crate::topics::command_topic;
use crate::transport::FirmwareTransport;
use crate::upgrade_path::UpgradeTarget;
use std::sync::Arc;

/// Reject targets that can only be reached by flashing manually
pub fn ensure_installable(installed: Option<&str>, target: &UpgradeTarget) -> Result<()> {
    if target.manual_required {
        return Err(UpdateError::InstallRejected {
            installed: installed.unwrap_or("unknown").to_owned(),
            minimum: target
                .target
                .as_ref()
                .map_or_else(|| "unknown".to_owned(), ToString::to_string),
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct FirmwareInstaller {
    transport: Arc<dyn FirmwareTransport>,
}

impl FirmwareInstaller {
    pub fn new(transport: Arc<dyn FirmwareTransport>) -> Self {
        Self { transport }
    }

    /// Publish the upgrade command. No acknowledgement is awaited; completion is
    /// seen later as a version change in the device's status reports.
    pub async fn install(
        &self,
        device: &str,
        installed: Option<&str>,
        target: &UpgradeTarget,
    ) -> Result<()> {
        ensure_installable(installed, target)?;

        match target.url {
            Some(url) => {
                self.transport
                    .publish(
                        &command_topic(device, "Backlog"),
                        &format!("OtaUrl {url}; Upgrade 1"),
                    )
                    .await
            }
            // Device falls back to its own configured OtaUrl
            None => {
                self.transport
                    .publish(&command_topic(device, "Upgrade"), "1")
                    .await
            }
        }
    }

    /// Ask the device to report its firmware status
    pub async fn poll_status(&self, device: &str) -> Result<()> {
        self.transport
            .publish(&command_topic(device, "STATUS"), "2")
            .await
    }
}
