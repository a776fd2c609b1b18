//! Network monitor.
//!
//! Polls a [`ConnectivityProbe`] and broadcasts `online`/`offline`
//! transitions. The status starts as [`NetworkStatus::Unknown`], so the first
//! observation always produces an event.

use crate::config::HostConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use possync_engine::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

/// A connectivity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkEvent {
    /// Connectivity was gained.
    Online,
    /// Connectivity was lost.
    Offline,
}

/// Last observed connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    /// Not probed yet.
    Unknown,
    /// Last probe succeeded.
    Online,
    /// Last probe failed.
    Offline,
}

/// Answers whether the network is currently usable.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Returns true if the network is reachable.
    async fn check(&self) -> bool;
}

/// Probes connectivity with an HTTP request.
///
/// Any HTTP response within the timeout counts as online, whatever its status.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    /// Creates a probe for `url`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::transport_fatal(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Creates a probe for the host's configured URL and timeout.
    pub fn from_config(config: &HostConfig) -> SyncResult<Self> {
        Self::new(&config.probe_url, config.probe_timeout)
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn check(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!(url = %self.url, error = %e, "connectivity probe failed");
                false
            }
        }
    }
}

/// A probe replaying scripted answers, then repeating the last one.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    answers: Mutex<VecDeque<bool>>,
    last: Mutex<bool>,
}

impl ScriptedProbe {
    /// Creates a probe answering `answers` in order.
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            last: Mutex::new(false),
        }
    }

    /// Queues another answer.
    pub fn push(&self, online: bool) {
        self.answers.lock().push_back(online);
    }
}

#[async_trait]
impl ConnectivityProbe for ScriptedProbe {
    async fn check(&self) -> bool {
        let mut last = self.last.lock();
        if let Some(answer) = self.answers.lock().pop_front() {
            *last = answer;
        }
        *last
    }
}

/// Polls connectivity and broadcasts transitions.
pub struct NetworkMonitor<P: ConnectivityProbe> {
    probe: P,
    interval: Duration,
    status: Mutex<NetworkStatus>,
    events: broadcast::Sender<NetworkEvent>,
}

impl<P: ConnectivityProbe> NetworkMonitor<P> {
    /// Creates a monitor polling `probe` every `interval`.
    pub fn new(probe: P, interval: Duration) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            probe,
            interval,
            status: Mutex::new(NetworkStatus::Unknown),
            events,
        }
    }

    /// Creates a monitor polling `probe` at the host's poll interval.
    pub fn from_config(probe: P, config: &HostConfig) -> Self {
        Self::new(probe, config.network_poll_interval)
    }

    /// Returns the polling interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Subscribes to transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    /// Returns the last observed status.
    pub fn status(&self) -> NetworkStatus {
        *self.status.lock()
    }

    /// Returns true if the last probe succeeded.
    pub fn is_online(&self) -> bool {
        self.status() == NetworkStatus::Online
    }

    /// Probes once and returns the transition, if any.
    pub async fn poll_once(&self) -> Option<NetworkEvent> {
        let online = self.probe.check().await;
        let (next, event) = if online {
            (NetworkStatus::Online, NetworkEvent::Online)
        } else {
            (NetworkStatus::Offline, NetworkEvent::Offline)
        };

        let previous = std::mem::replace(&mut *self.status.lock(), next);
        if previous == next {
            return None;
        }
        info!(?previous, ?next, "network status changed");
        // No subscribers is not an error.
        let _ = self.events.send(event);
        Some(event)
    }

    /// Polls until `shutdown` flips to true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("network monitor stopped");
    }
}
