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

//! Structured update events

use crate::lifecycle::SessionOutcome;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum UpdateEvent {
    ReleaseRefreshed {
        version: String,
        release_url: String,
    },
    UpdateStarted {
        device: String,
        from_version: Option<String>,
        to_version: Option<String>,
        staged: bool,
    },
    UpdateCompleted {
        device: String,
        from_version: Option<String>,
        to_version: String,
        duration_secs: i64,
    },
    UpdateSettled {
        device: String,
        version: String,
    },
    UpdateTimedOut {
        device: String,
        from_version: Option<String>,
        elapsed_secs: i64,
    },
    InstallRejected {
        device: String,
        reason: String,
    },
}

impl UpdateEvent {
    pub fn from_outcome(device: &str, outcome: &SessionOutcome) -> Self {
        let device = device.to_owned();
        match outcome {
            SessionOutcome::Completed { from, to, elapsed } => Self::UpdateCompleted {
                device,
                from_version: from.clone(),
                to_version: to.clone(),
                duration_secs: elapsed.num_seconds(),
            },
            SessionOutcome::Settled { version } => Self::UpdateSettled {
                device,
                version: version.clone(),
            },
            SessionOutcome::TimedOut { from, elapsed } => Self::UpdateTimedOut {
                device,
                from_version: from.clone(),
                elapsed_secs: elapsed.num_seconds(),
            },
        }
    }
}

/// Log an update event as JSON
pub fn report_event(event: &UpdateEvent) {
    match serde_json::to_string(event) {
        Ok(event_json) => tracing::info!("Update event: {event_json}"),
        Err(e) => tracing::warn!("Failed to serialize update event {event:?}: {e}"),
    }
}
