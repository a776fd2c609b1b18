//! Host runtime configuration.

use std::time::Duration;

/// Default URL probed by the network monitor.
pub const DEFAULT_PROBE_URL: &str = "https://clients3.google.com/generate_204";

/// Configuration for the sync manager, its workers and the network monitor.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Interval between scheduled runs while online.
    pub sync_interval: Duration,
    /// Maximum time a worker waits for one datastore reply.
    pub rpc_timeout: Duration,
    /// Capacity of the worker-to-host message channel.
    pub rpc_capacity: usize,
    /// Interval between connectivity probes.
    pub network_poll_interval: Duration,
    /// URL probed for connectivity.
    pub probe_url: String,
    /// Timeout of one connectivity probe.
    pub probe_timeout: Duration,
}

impl HostConfig {
    /// Creates a host configuration with default values.
    pub fn new() -> Self {
        Self {
            sync_interval: Duration::from_secs(5 * 60),
            rpc_timeout: Duration::from_secs(30),
            rpc_capacity: 64,
            network_poll_interval: Duration::from_secs(10),
            probe_url: DEFAULT_PROBE_URL.to_string(),
            probe_timeout: Duration::from_secs(5),
        }
    }

    /// Sets the scheduled run interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the per-call datastore reply timeout.
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Sets the worker-to-host channel capacity (at least one).
    pub fn with_rpc_capacity(mut self, capacity: usize) -> Self {
        self.rpc_capacity = capacity.max(1);
        self
    }

    /// Sets the connectivity polling interval.
    pub fn with_network_poll_interval(mut self, interval: Duration) -> Self {
        self.network_poll_interval = interval;
        self
    }

    /// Sets the probe target and its timeout.
    pub fn with_probe(mut self, url: impl Into<String>, timeout: Duration) -> Self {
        self.probe_url = url.into();
        self.probe_timeout = timeout;
        self
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::new()
    }
}
