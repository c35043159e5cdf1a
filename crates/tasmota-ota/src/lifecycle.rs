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

//! Per-device firmware update lifecycle
//!
//! A device is either `Idle` or `Installing`. An install opens a session; the
//! session is closed by the first status report after the device reboots
//! (completed or settled), or by the timeout. Completion is inferred only from
//! the reported version, the firmware never acknowledges the upgrade command.

use crate::error::{Result, UpdateError};
use crate::version::SemanticVersion;
use chrono::{DateTime, TimeDelta, Utc};

pub const DEFAULT_UPDATE_TIMEOUT_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Installing,
}

/// An in-flight firmware push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSession {
    pub device_id: String,
    pub version_before_update: Option<String>,
    pub target: Option<SemanticVersion>,
    pub started_at: DateTime<Utc>,
    /// Connectivity changes are expected while the device reboots
    pub suppress_availability: bool,
}

/// How a session ended; the lifecycle is `Idle` again once one is returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Device came back with a different version
    Completed {
        from: Option<String>,
        to: String,
        elapsed: TimeDelta,
    },
    /// Device came back with the same version; the hop may need retriggering
    Settled { version: String },
    /// No completion within the timeout; not retried
    TimedOut {
        from: Option<String>,
        elapsed: TimeDelta,
    },
}

#[derive(Debug, Clone)]
pub struct UpdateLifecycle {
    session: Option<UpdateSession>,
    timeout: TimeDelta,
}

impl Default for UpdateLifecycle {
    fn default() -> Self {
        Self::new(TimeDelta::seconds(DEFAULT_UPDATE_TIMEOUT_SECS))
    }
}

impl UpdateLifecycle {
    pub fn new(timeout: TimeDelta) -> Self {
        Self {
            session: None,
            timeout,
        }
    }

    pub fn state(&self) -> LifecycleState {
        if self.session.is_some() {
            LifecycleState::Installing
        } else {
            LifecycleState::Idle
        }
    }

    pub fn in_progress(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&UpdateSession> {
        self.session.as_ref()
    }

    pub fn should_suppress_availability(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.suppress_availability)
    }

    /// Open a session. Only one session per device; a second install is rejected.
    pub fn begin(
        &mut self,
        device_id: &str,
        installed: Option<&str>,
        target: Option<SemanticVersion>,
        now: DateTime<Utc>,
    ) -> Result<&UpdateSession> {
        if self.session.is_some() {
            return Err(UpdateError::UpdateInProgress {
                device: device_id.to_owned(),
            });
        }

        Ok(self.session.insert(UpdateSession {
            device_id: device_id.to_owned(),
            version_before_update: installed.map(str::to_owned),
            target,
            started_at: now,
            suppress_availability: true,
        }))
    }

    /// Feed a version reported by the device (already normalized)
    pub fn observe(&mut self, reported: &str, now: DateTime<Utc>) -> Option<SessionOutcome> {
        if let Some(outcome) = self.check_timeout(now) {
            return Some(outcome);
        }

        let session = self.session.as_ref()?;
        if reported.is_empty() {
            return None;
        }

        let outcome = if session.version_before_update.as_deref() == Some(reported) {
            tracing::debug!(
                device = %session.device_id,
                "Device back online after update, version unchanged: {reported}"
            );
            SessionOutcome::Settled {
                version: reported.to_owned(),
            }
        } else {
            tracing::info!(
                device = %session.device_id,
                "Tasmota firmware update completed: {} -> {reported}",
                session.version_before_update.as_deref().unwrap_or("unknown")
            );
            SessionOutcome::Completed {
                from: session.version_before_update.clone(),
                to: reported.to_owned(),
                elapsed: now - session.started_at,
            }
        };

        self.session = None;
        Some(outcome)
    }

    /// Close the session if it has outlived the timeout
    pub fn check_timeout(&mut self, now: DateTime<Utc>) -> Option<SessionOutcome> {
        let session = self.session.as_ref()?;
        let elapsed = now - session.started_at;
        if elapsed <= self.timeout {
            return None;
        }

        tracing::warn!(
            device = %session.device_id,
            "{}",
            UpdateError::UpdateTimeout {
                elapsed_secs: elapsed.num_seconds()
            }
        );
        let session = self.session.take()?;
        Some(SessionOutcome::TimedOut {
            from: session.version_before_update,
            elapsed,
        })
    }

    /// Drop the session without an outcome (the install command never went out)
    pub fn abort(&mut self) -> Option<UpdateSession> {
        self.session.take()
    }
}
