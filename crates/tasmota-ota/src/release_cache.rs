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

//! Shared cache of the latest Tasmota release
//!
//! Created empty at startup and injected into every consumer as an
//! `Arc<ReleaseCache>`. Only [`ReleaseCache::refresh`] writes it, always by
//! swapping in a complete `Arc<ReleaseInfo>`. Fetch failures never reach
//! readers: they keep seeing the last good release.

use crate::events::{UpdateEvent, report_event};
use crate::release::ReleaseInfo;
use crate::release_checker::ReleaseSource;
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const NOTIFY_CAPACITY: usize = 16;

#[derive(Debug)]
pub struct ReleaseCache {
    current: RwLock<Option<Arc<ReleaseInfo>>>,
    updates: broadcast::Sender<Arc<ReleaseInfo>>,
}

impl ReleaseCache {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            current: RwLock::new(None),
            updates,
        }
    }

    /// Last successfully fetched release, if any
    pub fn latest(&self) -> Option<Arc<ReleaseInfo>> {
        self.current.read().clone()
    }

    /// Receive every release stored from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ReleaseInfo>> {
        self.updates.subscribe()
    }

    /// Replace the cached release and notify subscribers
    pub fn store(&self, info: ReleaseInfo) -> Arc<ReleaseInfo> {
        let info = Arc::new(info);
        *self.current.write() = Some(Arc::clone(&info));
        // No subscribers is fine
        let _ = self.updates.send(Arc::clone(&info));
        info
    }

    /// Fetch the latest release; on failure the cached release is kept.
    ///
    /// Returns true when a new release was stored.
    pub async fn refresh(&self, source: &ReleaseSource) -> bool {
        match source.fetch_latest().await {
            Ok(mut info) => {
                info.last_checked_at = Utc::now();
                let info = self.store(info);
                tracing::info!(
                    "Latest Tasmota release: {} ({})",
                    info.version,
                    info.release_url
                );
                report_event(&UpdateEvent::ReleaseRefreshed {
                    version: info.version.to_string(),
                    release_url: info.release_url.clone(),
                });
                true
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to refresh Tasmota release from {}: {e}",
                    source.url()
                );
                false
            }
        }
    }
}

/// Background refresh task; refreshes immediately, then every `interval`
#[derive(Debug)]
pub struct RefreshHandle {
    task: JoinHandle<()>,
}

impl RefreshHandle {
    pub fn shutdown(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub fn spawn_refresh(
    cache: Arc<ReleaseCache>,
    source: ReleaseSource,
    interval: Duration,
) -> RefreshHandle {
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            cache.refresh(&source).await;
        }
    });

    RefreshHandle { task }
}
