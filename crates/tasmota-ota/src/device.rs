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

//! Firmware view of a single Tasmota device
//!
//! Combines what the device reports (installed version, connectivity), the
//! latest release snapshot and the device's update lifecycle. This is the
//! piece a host integration wraps as its "update" entity.

use crate::error::Result;
use crate::installer::{FirmwareInstaller, ensure_installable};
use crate::lifecycle::{SessionOutcome, UpdateLifecycle};
use crate::release::ReleaseInfo;
use crate::upgrade_path::{self, UpgradeTarget};
use crate::version::{SemanticVersion, normalize_installed};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFirmwareState {
    pub device_id: String,
    pub name: Option<String>,
    /// Reported version without the build flavour, kept for display
    pub installed_version_raw: Option<String>,
    /// `None` when unknown or unparseable
    pub installed_version: Option<SemanticVersion>,
    pub available: bool,
}

#[derive(Debug)]
pub struct FirmwareDevice {
    state: DeviceFirmwareState,
    lifecycle: UpdateLifecycle,
    release: Option<Arc<ReleaseInfo>>,
    /// Last connectivity seen on the transport, recorded even while suppressed
    last_reported_online: bool,
}

impl FirmwareDevice {
    pub fn new(
        device_id: impl Into<String>,
        name: Option<String>,
        release: Option<Arc<ReleaseInfo>>,
        update_timeout: TimeDelta,
    ) -> Self {
        Self {
            state: DeviceFirmwareState {
                device_id: device_id.into(),
                name,
                installed_version_raw: None,
                installed_version: None,
                available: false,
            },
            lifecycle: UpdateLifecycle::new(update_timeout),
            release,
            last_reported_online: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.state.device_id
    }

    pub fn display_name(&self) -> &str {
        self.state.name.as_deref().unwrap_or(&self.state.device_id)
    }

    pub fn state(&self) -> &DeviceFirmwareState {
        &self.state
    }

    pub fn lifecycle(&self) -> &UpdateLifecycle {
        &self.lifecycle
    }

    pub fn release(&self) -> Option<&ReleaseInfo> {
        self.release.as_deref()
    }

    pub fn installed_version(&self) -> Option<&str> {
        self.state.installed_version_raw.as_deref()
    }

    fn latest_release_version(&self) -> Option<&SemanticVersion> {
        self.release.as_deref().map(|release| &release.version)
    }

    /// Next hop for this device
    pub fn next_target(&self) -> UpgradeTarget {
        let latest = self.latest_release_version();
        match (&self.state.installed_version_raw, &self.state.installed_version) {
            (Some(_), None) => UpgradeTarget::default_ota(latest),
            (_, installed) => upgrade_path::next_target(installed.as_ref(), latest),
        }
    }

    /// Version shown as "latest": the next hop when a staged upgrade is needed,
    /// so it always matches what install will actually flash.
    pub fn latest_version(&self) -> Option<SemanticVersion> {
        let latest = self.latest_release_version();
        if self.state.installed_version_raw.is_none() {
            return latest.cloned();
        }

        let hop = self.next_target();
        if hop.is_staged(latest) {
            hop.target
        } else {
            latest.cloned()
        }
    }

    pub fn update_available(&self) -> bool {
        match (&self.state.installed_version, self.latest_version()) {
            (Some(installed), Some(latest)) => latest > *installed,
            _ => false,
        }
    }

    /// Indeterminate progress: the firmware reports no percentage
    pub fn in_progress(&self) -> bool {
        self.lifecycle.in_progress()
    }

    /// Stays available while an update is running, the reboot is expected
    pub fn available(&self) -> bool {
        self.lifecycle.in_progress() || self.state.available
    }

    /// Apply a transport connectivity change; returns false when suppressed
    pub fn on_availability(&mut self, online: bool) -> bool {
        self.last_reported_online = online;
        if self.lifecycle.should_suppress_availability() {
            tracing::debug!(
                device = %self.state.device_id,
                "Suppressing availability update ({online}) during firmware update"
            );
            return false;
        }
        self.state.available = online;
        true
    }

    pub fn on_release(&mut self, release: Arc<ReleaseInfo>) {
        self.release = Some(release);
    }

    /// Apply a firmware version reported by the device
    pub fn on_firmware_version(
        &mut self,
        reported: &str,
        now: DateTime<Utc>,
    ) -> Option<SessionOutcome> {
        let normalized = normalize_installed(reported);
        let outcome = self.lifecycle.observe(&normalized, now);
        if outcome.is_some() {
            // A status report means the device is back, even if its LWT was suppressed
            self.state.available = true;
            self.last_reported_online = true;
        }

        self.state.installed_version = if normalized.is_empty() {
            None
        } else {
            SemanticVersion::parse(&normalized)
                .inspect_err(|e| {
                    tracing::warn!(
                        device = %self.state.device_id,
                        "Cannot parse installed version: {e}"
                    );
                })
                .ok()
        };
        self.state.installed_version_raw = (!normalized.is_empty()).then_some(normalized);

        outcome
    }

    /// Watchdog hook: close a session that never got a status report
    pub fn check_timeout(&mut self, now: DateTime<Utc>) -> Option<SessionOutcome> {
        let outcome = self.lifecycle.check_timeout(now)?;
        // Nothing reported back, fall back to what the transport said last
        self.state.available = self.last_reported_online;
        Some(outcome)
    }

    /// Release notes, prefixed with a warning when a staged or manual upgrade is needed
    pub fn release_notes(&self) -> String {
        let notes = self
            .release
            .as_deref()
            .map(|release| release.release_notes.as_str())
            .unwrap_or_default();

        let Some(installed) = self.installed_version() else {
            return notes.to_owned();
        };

        let hop = self.next_target();
        let Some(ref target) = hop.target else {
            return notes.to_owned();
        };
        if !hop.is_staged(self.latest_release_version()) {
            return notes.to_owned();
        }

        let mut warning = if hop.manual_required {
            format!(
                "⚠️ **Manual upgrade required!**\n\n\
                 Your current firmware ({installed}) is too old for automatic OTA updates. \
                 Please upgrade manually to at least version {target} before using this \
                 update feature.\n\n---\n\n"
            )
        } else {
            format!(
                "ℹ️ **Staged upgrade required**\n\n\
                 Your firmware ({installed}) requires a staged upgrade path. This update will \
                 first upgrade to version {target}. You will need to run the update multiple \
                 times to reach the latest version.\n\n---\n\n"
            )
        };

        warning.push_str(notes);
        warning
    }

    /// Ask the device to report its firmware version
    pub async fn poll_status(&self, installer: &FirmwareInstaller) -> Result<()> {
        installer.poll_status(&self.state.device_id).await
    }

    /// Start an update to the next hop.
    ///
    /// Manual-only targets are rejected before any session is opened. If the
    /// command cannot be published the session is rolled back to idle.
    pub async fn install(
        &mut self,
        installer: &FirmwareInstaller,
        now: DateTime<Utc>,
    ) -> Result<UpgradeTarget> {
        let target = self.next_target();
        let installed = self.state.installed_version_raw.as_deref();

        if let Err(e) = ensure_installable(installed, &target) {
            tracing::error!(device = %self.state.device_id, "Cannot auto-upgrade: {e}");
            return Err(e);
        }

        let latest = self.release.as_deref().map(|release| &release.version);
        if target.is_staged(latest)
            && let Some(ref hop) = target.target
        {
            tracing::info!(
                device = %self.state.device_id,
                "Staged upgrade: updating from {} to intermediate version {hop}",
                installed.unwrap_or("unknown")
            );
        }

        self.lifecycle
            .begin(&self.state.device_id, installed, target.target.clone(), now)?;

        tracing::info!(
            device = %self.state.device_id,
            "Starting Tasmota firmware update from version {} (target: {})",
            installed.unwrap_or("unknown"),
            target
                .target
                .as_ref()
                .map_or_else(|| "latest".to_owned(), ToString::to_string)
        );

        if let Err(e) = installer
            .install(&self.state.device_id, installed, &target)
            .await
        {
            self.lifecycle.abort();
            tracing::error!(device = %self.state.device_id, "Firmware update not sent: {e}");
            return Err(e);
        }

        Ok(target)
    }
}
