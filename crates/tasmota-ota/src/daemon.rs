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

//! Update daemon
//!
//! Owns every configured device, applies inbound MQTT messages and release
//! refreshes to them, and sends install commands (on request or automatically).
//! Everything runs on one task, so device state needs no locking.

use crate::config::Config;
use crate::device::FirmwareDevice;
use crate::error::{Result, UpdateError};
use crate::events::{UpdateEvent, report_event};
use crate::installer::FirmwareInstaller;
use crate::lifecycle::SessionOutcome;
use crate::release::ReleaseInfo;
use crate::release_cache::{ReleaseCache, spawn_refresh};
use crate::release_checker::ReleaseSource;
use crate::topics::{DeviceMessage, STATUS_SUBSCRIPTIONS, parse_message};
use crate::transport::{FirmwareTransport, MqttTransport};
use crate::upgrade_path::UpgradeTarget;
use chrono::{DateTime, Utc};
use rumqttc::{Event, Packet};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct Daemon {
    devices: BTreeMap<String, FirmwareDevice>,
    installer: FirmwareInstaller,
    transport: Arc<dyn FirmwareTransport>,
    auto_install: bool,
    /// Devices auto-install leaves alone until they report a different version.
    /// Value is the installed version at the time of the hold.
    held: HashMap<String, Option<String>>,
}

impl Daemon {
    pub fn new(
        config: &Config,
        transport: Arc<dyn FirmwareTransport>,
        release: Option<Arc<ReleaseInfo>>,
    ) -> Self {
        let timeout = config.update.timeout();
        let devices = config
            .devices
            .iter()
            .map(|device| {
                (
                    device.topic.clone(),
                    FirmwareDevice::new(
                        device.topic.clone(),
                        device.name.clone(),
                        release.clone(),
                        timeout,
                    ),
                )
            })
            .collect();

        Self {
            devices,
            installer: FirmwareInstaller::new(Arc::clone(&transport)),
            transport,
            auto_install: config.update.auto_install,
            held: HashMap::new(),
        }
    }

    pub fn device(&self, device_id: &str) -> Option<&FirmwareDevice> {
        self.devices.get(device_id)
    }

    pub fn is_held(&self, device_id: &str) -> bool {
        self.held.contains_key(device_id)
    }

    /// Subscribe to the status topics and ask every device for a fresh status.
    /// Called on each (re)connect, the broker forgets subscriptions.
    pub async fn on_connected(&self) {
        for topic in STATUS_SUBSCRIPTIONS {
            if let Err(e) = self.transport.subscribe(topic).await {
                warn!("Failed to subscribe: {e}");
            }
        }
        for device in self.devices.values() {
            if let Err(e) = device.poll_status(&self.installer).await {
                warn!("Failed to request firmware status: {e}");
            }
        }
    }

    pub async fn handle_message(&mut self, topic: &str, payload: &[u8], now: DateTime<Utc>) {
        let Some((device_id, message)) = parse_message(topic, payload) else {
            trace!("Ignoring message on {topic}");
            return;
        };
        let Some(device) = self.devices.get_mut(&device_id) else {
            debug!("Message for unconfigured device {device_id}");
            return;
        };

        match message {
            DeviceMessage::Availability(online) => {
                if device.on_availability(online) && online {
                    // Status is only sent on request, ask for it whenever the device comes back
                    if let Err(e) = device.poll_status(&self.installer).await {
                        warn!("Failed to request firmware status: {e}");
                    }
                }
            }
            DeviceMessage::FirmwareVersion(reported) => {
                let outcome = device.on_firmware_version(&reported, now);
                let installed = device.installed_version().map(str::to_owned);

                if let Some(ref outcome) = outcome {
                    report_event(&UpdateEvent::from_outcome(&device_id, outcome));
                }
                self.update_hold(&device_id, installed, outcome.as_ref());
                self.maybe_auto_install(&device_id, now).await;
            }
        }
    }

    /// Push a new release to every device
    pub async fn apply_release(&mut self, release: Arc<ReleaseInfo>, now: DateTime<Utc>) {
        for device in self.devices.values_mut() {
            device.on_release(Arc::clone(&release));
        }

        let ids: Vec<String> = self.devices.keys().cloned().collect();
        for device_id in ids {
            self.maybe_auto_install(&device_id, now).await;
        }
    }

    /// Close sessions of devices that never reported back
    pub fn check_timeouts(&mut self, now: DateTime<Utc>) {
        let mut timed_out = Vec::new();
        for (device_id, device) in &mut self.devices {
            if let Some(outcome) = device.check_timeout(now) {
                report_event(&UpdateEvent::from_outcome(device_id, &outcome));
                timed_out.push((device_id.clone(), device.installed_version().map(str::to_owned)));
            }
        }
        for (device_id, installed) in timed_out {
            self.held.insert(device_id, installed);
        }
    }

    /// Install the next hop on one device
    pub async fn install(&mut self, device_id: &str, now: DateTime<Utc>) -> Result<UpgradeTarget> {
        let device = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| UpdateError::UnknownDevice {
                device: device_id.to_owned(),
            })?;

        let from_version = device.installed_version().map(str::to_owned);
        match device.install(&self.installer, now).await {
            Ok(target) => {
                let latest = device.release().map(|release| &release.version);
                report_event(&UpdateEvent::UpdateStarted {
                    device: device_id.to_owned(),
                    from_version,
                    to_version: target.target.as_ref().map(ToString::to_string),
                    staged: target.is_staged(latest),
                });
                Ok(target)
            }
            Err(e) => {
                if matches!(e, UpdateError::InstallRejected { .. }) {
                    report_event(&UpdateEvent::InstallRejected {
                        device: device_id.to_owned(),
                        reason: e.to_string(),
                    });
                }
                Err(e)
            }
        }
    }

    fn update_hold(
        &mut self,
        device_id: &str,
        installed: Option<String>,
        outcome: Option<&SessionOutcome>,
    ) {
        match outcome {
            // A hop that did not change the version would just be retried forever
            Some(SessionOutcome::Settled { .. } | SessionOutcome::TimedOut { .. }) => {
                self.held.insert(device_id.to_owned(), installed);
            }
            Some(SessionOutcome::Completed { .. }) => {
                self.held.remove(device_id);
            }
            None => {
                if self
                    .held
                    .get(device_id)
                    .is_some_and(|held_at| *held_at != installed)
                {
                    debug!("{device_id} reports a new version, releasing auto-install hold");
                    self.held.remove(device_id);
                }
            }
        }
    }

    async fn maybe_auto_install(&mut self, device_id: &str, now: DateTime<Utc>) {
        if !self.auto_install || self.held.contains_key(device_id) {
            return;
        }
        let Some(device) = self.devices.get(device_id) else {
            return;
        };
        if device.in_progress() || !device.available() || !device.update_available() {
            return;
        }

        info!("Auto-installing firmware update on {}", device.display_name());
        if let Err(e) = self.install(device_id, now).await {
            error!("Auto-install on {device_id} failed: {e}");
            let installed = self
                .devices
                .get(device_id)
                .and_then(|device| device.installed_version().map(str::to_owned));
            self.held.insert(device_id.to_owned(), installed);
        }
    }
}

/// Run the daemon until Ctrl-C
pub async fn run(config: Config) -> Result<()> {
    let source = ReleaseSource::new(&config.release)?;
    let (transport, mut eventloop) = MqttTransport::connect(&config.mqtt, config.devices.len());

    let cache = Arc::new(ReleaseCache::new());
    let mut releases = cache.subscribe();
    let refresh = spawn_refresh(Arc::clone(&cache), source, config.release.check_interval());

    let mut daemon = Daemon::new(&config, Arc::new(transport), cache.latest());
    info!(
        "Managing {} device(s), auto_install={}",
        config.devices.len(),
        config.update.auto_install
    );

    let mut watchdog = config.update.watchdog_interval().map(|period| {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    });

    let mut backoff = ReconnectBackoff::default();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                info!("Shutdown signal received");
                break;
            }
            event = eventloop.poll(), if !backoff.is_waiting() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to MQTT broker");
                    daemon.on_connected().await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    daemon
                        .handle_message(&publish.topic, &publish.payload, Utc::now())
                        .await;
                }
                Ok(event @ (Event::Incoming(_) | Event::Outgoing(_))) => {
                    trace!(?event, "not handled");
                }
                Err(e) => {
                    warn!("MQTT connection error: {e}, retrying in {}s", RECONNECT_DELAY.as_secs());
                    backoff.arm();
                }
            },
            () = backoff.wait() => debug!("Reconnecting to MQTT broker"),
            received = releases.recv() => match received {
                Ok(release) => daemon.apply_release(release, Utc::now()).await,
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Skipped {skipped} release notifications");
                    if let Some(release) = cache.latest() {
                        daemon.apply_release(release, Utc::now()).await;
                    }
                }
                Err(RecvError::Closed) => {
                    warn!("Release notifications closed");
                    break;
                }
            },
            () = watchdog_tick(watchdog.as_mut()) => daemon.check_timeouts(Utc::now()),
        }
    }

    refresh.shutdown();
    Ok(())
}

/// Pause between MQTT connection attempts that keeps the rest of the loop running
#[derive(Debug, Default)]
struct ReconnectBackoff {
    deadline: Option<Instant>,
}

impl ReconnectBackoff {
    fn arm(&mut self) {
        self.deadline = Some(Instant::now() + RECONNECT_DELAY);
    }

    fn is_waiting(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves once the delay is over; never resolves when not armed
    async fn wait(&mut self) {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending().await,
        }
    }
}

async fn watchdog_tick(watchdog: Option<&mut Interval>) {
    match watchdog {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceSettings, UpdateSettings};
    use crate::transport::MemoryTransport;
    use crate::upgrade_path::LATEST_URL;
    use chrono::{TimeDelta, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn release(tag: &str) -> Arc<ReleaseInfo> {
        Arc::new(ReleaseInfo::from_tag(tag, "https://example.com", "notes", start()).unwrap())
    }

    fn config(auto_install: bool) -> Config {
        Config {
            update: UpdateSettings {
                auto_install,
                ..Default::default()
            },
            devices: vec![
                DeviceSettings {
                    topic: "plug".to_owned(),
                    name: Some("Kitchen plug".to_owned()),
                },
                DeviceSettings {
                    topic: "bulb".to_owned(),
                    name: None,
                },
            ],
            ..Default::default()
        }
    }

    fn daemon(auto_install: bool) -> (Arc<MemoryTransport>, Daemon) {
        let transport = Arc::new(MemoryTransport::new());
        let daemon = Daemon::new(
            &config(auto_install),
            transport.clone(),
            Some(release("v14.3.0")),
        );
        (transport, daemon)
    }

    fn status2(version: &str) -> Vec<u8> {
        format!(r#"{{"StatusFWR":{{"Version":"{version}"}}}}"#).into_bytes()
    }

    #[tokio::test]
    async fn test_on_connected_subscribes_and_polls() {
        let (transport, daemon) = daemon(false);
        daemon.on_connected().await;

        assert_eq!(
            transport.subscribed(),
            vec![
                "tele/+/LWT".to_owned(),
                "stat/+/STATUS2".to_owned(),
                "tele/+/INFO1".to_owned(),
            ]
        );
        assert_eq!(
            transport.published(),
            vec![
                ("cmnd/bulb/STATUS".to_owned(), "2".to_owned()),
                ("cmnd/plug/STATUS".to_owned(), "2".to_owned()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_backoff_does_not_block() {
        let mut backoff = ReconnectBackoff::default();
        assert!(!backoff.is_waiting());
        assert!(
            tokio::time::timeout(Duration::from_secs(60), backoff.wait())
                .await
                .is_err()
        );

        backoff.arm();
        assert!(backoff.is_waiting());

        // Other work gets through while the delay runs
        let (sender, mut receiver) = tokio::sync::mpsc::channel(1);
        sender.send(()).await.unwrap();
        let started = Instant::now();
        tokio::select! {
            () = backoff.wait() => panic!("backoff finished before pending work"),
            Some(()) = receiver.recv() => {}
        }
        assert!(started.elapsed() < RECONNECT_DELAY);
        assert!(backoff.is_waiting());

        backoff.wait().await;
        assert!(started.elapsed() >= RECONNECT_DELAY);
        assert!(!backoff.is_waiting());
    }

    #[tokio::test]
    async fn test_on_connected_with_many_devices_fits_mqtt_queue() {
        let config = Config {
            devices: (0..200)
                .map(|i| DeviceSettings {
                    topic: format!("tasmota_{i:03}"),
                    name: None,
                })
                .collect(),
            ..Default::default()
        };
        let (transport, _eventloop) = MqttTransport::connect(&config.mqtt, config.devices.len());
        let daemon = Daemon::new(&config, Arc::new(transport.clone()), None);

        daemon.on_connected().await;

        // Queue still has room after subscribing and polling every device
        transport.subscribe("tele/extra/LWT").await.unwrap();
        transport.publish("cmnd/extra/STATUS", "2").await.unwrap();
    }

    #[tokio::test]
    async fn test_messages_update_device_state() {
        let (transport, mut daemon) = daemon(false);

        daemon.handle_message("tele/plug/LWT", b"Online", start()).await;
        daemon
            .handle_message("stat/plug/STATUS2", &status2("12.0.0(tasmota)"), start())
            .await;

        let device = daemon.device("plug").unwrap();
        assert!(device.available());
        assert_eq!(device.installed_version(), Some("12.0.0"));
        assert!(device.update_available());
        // Online triggers a status poll, nothing else without auto-install
        assert_eq!(
            transport.published(),
            vec![("cmnd/plug/STATUS".to_owned(), "2".to_owned())]
        );
    }

    #[tokio::test]
    async fn test_unknown_device_ignored() {
        let (transport, mut daemon) = daemon(true);
        daemon
            .handle_message("stat/garage/STATUS2", &status2("8.0.0"), start())
            .await;
        assert!(daemon.device("garage").is_none());
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_manual_install() {
        let (transport, mut daemon) = daemon(false);
        daemon
            .handle_message("stat/plug/STATUS2", &status2("12.0.0"), start())
            .await;

        let target = daemon.install("plug", start()).await.unwrap();
        assert_eq!(target.url, Some(LATEST_URL));
        assert!(daemon.device("plug").unwrap().in_progress());
        assert_eq!(transport.published().len(), 1);

        assert!(matches!(
            daemon.install("garage", start()).await,
            Err(UpdateError::UnknownDevice { ref device }) if device == "garage"
        ));
    }

    #[tokio::test]
    async fn test_auto_install_walks_staged_path() {
        let (transport, mut daemon) = daemon(true);
        daemon.handle_message("tele/plug/LWT", b"Online", start()).await;
        daemon
            .handle_message("stat/plug/STATUS2", &status2("8.1.0(tasmota)"), start())
            .await;

        let published = transport.published();
        assert_eq!(
            published.last().unwrap().1,
            "OtaUrl http://ota.tasmota.com/tasmota/release-8.5.1/tasmota.bin; Upgrade 1"
        );
        assert!(daemon.device("plug").unwrap().in_progress());

        // Reboot into the intermediate release triggers the next hop
        let later = start() + TimeDelta::minutes(2);
        daemon
            .handle_message("stat/plug/STATUS2", &status2("8.5.1(tasmota)"), later)
            .await;
        assert_eq!(
            transport.published().last().unwrap().1,
            "OtaUrl http://ota.tasmota.com/tasmota/release-9.1.0/tasmota.bin.gz; Upgrade 1"
        );

        let later = later + TimeDelta::minutes(2);
        daemon
            .handle_message("stat/plug/STATUS2", &status2("9.1.0(tasmota)"), later)
            .await;
        assert_eq!(
            transport.published().last().unwrap().1,
            format!("OtaUrl {LATEST_URL}; Upgrade 1")
        );

        let later = later + TimeDelta::minutes(2);
        let before = transport.published().len();
        daemon
            .handle_message("stat/plug/STATUS2", &status2("14.3.0(tasmota)"), later)
            .await;
        let device = daemon.device("plug").unwrap();
        assert!(!device.in_progress());
        assert!(!device.update_available());
        assert_eq!(transport.published().len(), before);
    }

    #[tokio::test]
    async fn test_auto_install_holds_after_settle() {
        let (transport, mut daemon) = daemon(true);
        daemon.handle_message("tele/plug/LWT", b"Online", start()).await;
        daemon
            .handle_message("stat/plug/STATUS2", &status2("12.0.0"), start())
            .await;
        let sent = transport.published().len();

        daemon
            .handle_message("stat/plug/STATUS2", &status2("12.0.0"), start() + TimeDelta::minutes(1))
            .await;

        assert!(daemon.is_held("plug"));
        assert!(!daemon.device("plug").unwrap().in_progress());
        assert_eq!(transport.published().len(), sent);

        // A manual flash to another version releases the hold
        daemon
            .handle_message("stat/plug/STATUS2", &status2("13.0.0"), start() + TimeDelta::minutes(9))
            .await;
        assert!(!daemon.is_held("plug"));
        assert!(daemon.device("plug").unwrap().in_progress());
    }

    #[tokio::test]
    async fn test_auto_install_skips_manual_targets() {
        let (transport, mut daemon) = daemon(true);
        daemon.handle_message("tele/plug/LWT", b"Online", start()).await;
        daemon
            .handle_message("stat/plug/STATUS2", &status2("2.0.0"), start())
            .await;

        assert!(daemon.is_held("plug"));
        assert!(!daemon.device("plug").unwrap().in_progress());
        assert_eq!(
            transport.published(),
            vec![("cmnd/plug/STATUS".to_owned(), "2".to_owned())]
        );
    }

    #[tokio::test]
    async fn test_apply_release_triggers_auto_install() {
        let (transport, mut daemon) = daemon(true);
        daemon.handle_message("tele/plug/LWT", b"Online", start()).await;
        daemon
            .handle_message("stat/plug/STATUS2", &status2("14.3.0"), start())
            .await;
        assert!(!daemon.device("plug").unwrap().in_progress());

        daemon.apply_release(release("v14.4.0"), start()).await;

        assert!(daemon.device("plug").unwrap().in_progress());
        assert_eq!(
            transport.published().last().unwrap().0,
            "cmnd/plug/Backlog"
        );
        // Offline device is not touched
        assert!(!daemon.device("bulb").unwrap().in_progress());
    }

    #[tokio::test]
    async fn test_check_timeouts_holds_device() {
        let (_transport, mut daemon) = daemon(false);
        daemon
            .handle_message("stat/plug/STATUS2", &status2("12.0.0"), start())
            .await;
        daemon.install("plug", start()).await.unwrap();

        daemon.check_timeouts(start() + TimeDelta::minutes(1));
        assert!(daemon.device("plug").unwrap().in_progress());

        daemon.check_timeouts(start() + TimeDelta::minutes(6));
        assert!(!daemon.device("plug").unwrap().in_progress());
        assert!(daemon.is_held("plug"));
    }
}
