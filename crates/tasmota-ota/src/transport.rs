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

//! Message transport to Tasmota devices

use crate::config::MqttSettings;
use crate::error::{Result, UpdateError};
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};

const REQUEST_CAPACITY: usize = 128;

/// Publish/subscribe channel to the devices
#[async_trait]
pub trait FirmwareTransport: Send + Sync + std::fmt::Debug {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()>;

    async fn subscribe(&self, topic: &str) -> Result<()>;
}

/// MQTT transport backed by `rumqttc`.
///
/// Requests are queued without waiting so the caller's event loop (which also
/// drives the [`EventLoop`]) never blocks on a full request channel. The
/// channel is sized so a status poll of every device fits on top of the base
/// capacity.
#[derive(Debug, Clone)]
pub struct MqttTransport {
    client: AsyncClient,
}

impl MqttTransport {
    pub fn connect(settings: &MqttSettings, device_count: usize) -> (Self, EventLoop) {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(settings.keep_alive());
        if let Some(ref username) = settings.username {
            options.set_credentials(username, settings.resolved_password().unwrap_or_default());
        }

        tracing::info!(
            "Connecting to MQTT broker {}:{} as {}",
            settings.host,
            settings.port,
            settings.client_id
        );

        let (client, eventloop) =
            AsyncClient::new(options, REQUEST_CAPACITY.saturating_add(device_count));
        (Self { client }, eventloop)
    }
}

#[async_trait]
impl FirmwareTransport for MqttTransport {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        tracing::debug!("MQTT publish {topic}: {payload}");
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| UpdateError::TransportPublish(format!("{topic}: {e}")))
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        tracing::debug!("MQTT subscribe {topic}");
        self.client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| UpdateError::TransportSubscribe(format!("{topic}: {e}")))
    }
}

/// In-memory transport that records traffic instead of sending it
#[derive(Debug, Default)]
pub struct MemoryTransport {
    published: Mutex<Vec<(String, String)>>,
    subscribed: Mutex<Vec<String>>,
    fail_publish: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose every publish fails
    pub fn failing() -> Self {
        Self {
            fail_publish: true,
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.subscribed.lock().clone()
    }
}

#[async_trait]
impl FirmwareTransport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        if self.fail_publish {
            return Err(UpdateError::TransportPublish(format!(
                "{topic}: transport unavailable"
            )));
        }
        self.published
            .lock()
            .push((topic.to_owned(), payload.to_owned()));
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.subscribed.lock().push(topic.to_owned());
        Ok(())
    }
}
