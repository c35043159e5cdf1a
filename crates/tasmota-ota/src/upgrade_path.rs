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

//! Staged upgrade path for old Tasmota firmware
//!
//! Old firmware cannot OTA straight to the newest binary. Each call resolves a
//! single hop; the device must reboot and report its new version before the next
//! hop is resolved.

use crate::version::SemanticVersion;

/// Generic OTA binary for devices that can jump straight to the latest release
pub const LATEST_URL: &str = "http://ota.tasmota.com/tasmota/release/tasmota.bin.gz";

/// One boundary of the staged path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeStep {
    pub threshold: SemanticVersion,
    /// `None` marks a boundary that can only be crossed by a manual flash
    pub firmware_url: Option<&'static str>,
}

// Pre 5.14 firmware cannot fetch URLs containing '-', hence the underscores.
pub const UPGRADE_STEPS: [UpgradeStep; 7] = [
    UpgradeStep {
        threshold: SemanticVersion::new(3, 9, 0),
        firmware_url: None,
    },
    UpgradeStep {
        threshold: SemanticVersion::new(4, 0, 0),
        firmware_url: None,
    },
    UpgradeStep {
        threshold: SemanticVersion::new(5, 14, 0),
        firmware_url: Some("http://ota.tasmota.com/tasmota/release_5.14.0/sonoff.bin"),
    },
    UpgradeStep {
        threshold: SemanticVersion::new(6, 7, 1),
        firmware_url: Some("http://ota.tasmota.com/tasmota/release_6.7.1/sonoff.bin"),
    },
    UpgradeStep {
        threshold: SemanticVersion::new(7, 2, 0),
        firmware_url: Some("http://ota.tasmota.com/tasmota/release-7.2.0/tasmota.bin"),
    },
    UpgradeStep {
        threshold: SemanticVersion::new(8, 5, 1),
        firmware_url: Some("http://ota.tasmota.com/tasmota/release-8.5.1/tasmota.bin"),
    },
    UpgradeStep {
        threshold: SemanticVersion::new(9, 1, 0),
        firmware_url: Some("http://ota.tasmota.com/tasmota/release-9.1.0/tasmota.bin.gz"),
    },
];

/// Result of resolving the next hop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeTarget {
    pub target: Option<SemanticVersion>,
    pub url: Option<&'static str>,
    pub manual_required: bool,
}

impl UpgradeTarget {
    /// Target for a device whose installed version could not be parsed: let the
    /// device use its own configured OTA URL.
    pub fn default_ota(latest: Option<&SemanticVersion>) -> Self {
        Self {
            target: latest.cloned(),
            url: None,
            manual_required: false,
        }
    }

    fn latest(latest: Option<&SemanticVersion>) -> Self {
        Self {
            target: latest.cloned(),
            url: Some(LATEST_URL),
            manual_required: false,
        }
    }

    /// Whether this hop is an intermediate step rather than the latest release
    pub fn is_staged(&self, latest: Option<&SemanticVersion>) -> bool {
        self.target.is_some() && self.target.as_ref() != latest
    }
}

/// Resolve the next upgrade hop for `installed`
pub fn next_target(
    installed: Option<&SemanticVersion>,
    latest: Option<&SemanticVersion>,
) -> UpgradeTarget {
    let Some(installed) = installed else {
        return UpgradeTarget::latest(latest);
    };

    UPGRADE_STEPS
        .iter()
        .find(|step| *installed < step.threshold)
        .map_or_else(
            || UpgradeTarget::latest(latest),
            |step| UpgradeTarget {
                target: Some(step.threshold.clone()),
                url: step.firmware_url,
                manual_required: step.firmware_url.is_none(),
            },
        )
}
