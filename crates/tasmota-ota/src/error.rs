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

//! Error types for the tasmota-ota crate

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out fetching latest release")]
    FetchTimeout,

    #[error("release request failed: {0}")]
    FetchRequest(String),

    #[error("release source returned HTTP {status}")]
    FetchHttp { status: u16 },

    #[error("failed to parse release: {0}")]
    FetchParse(String),

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error(
        "manual upgrade required: firmware {installed} is too old for OTA, upgrade to at least {minimum} first"
    )]
    InstallRejected { installed: String, minimum: String },

    #[error("unknown device: {device}")]
    UnknownDevice { device: String },

    #[error("update already in progress for {device}")]
    UpdateInProgress { device: String },

    #[error("firmware update timed out after {elapsed_secs}s")]
    UpdateTimeout { elapsed_secs: i64 },

    #[error("failed to publish command: {0}")]
    TransportPublish(String),

    #[error("failed to subscribe: {0}")]
    TransportSubscribe(String),
}

pub type Result<T> = std::result::Result<T, UpdateError>;
