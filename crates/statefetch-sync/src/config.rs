//! Configuration for state sync.

use std::time::Duration;

/// Configuration for sync behavior.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How long a peer may take to answer a node-data request.
    pub request_timeout: Duration,
    /// Maximum trie nodes to request from one peer at once.
    pub max_items_per_request: usize,
    /// Round trip a request is sized for.
    pub target_rtt: Duration,
    /// How often the fetcher re-checks for idle peers while nothing happens.
    pub idle_poll_interval: Duration,
    /// Capacity of the root-change request queue.
    pub request_queue: usize,
    /// Capacity of the delivery channel from the network.
    pub delivery_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_items_per_request: 384,
            target_rtt: Duration::from_secs(2),
            idle_poll_interval: Duration::from_millis(250),
            request_queue: 16,
            delivery_buffer: 1024,
        }
    }
}

impl SyncConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_items_per_request(mut self, max: usize) -> Self {
        self.max_items_per_request = max.max(1);
        self
    }

    pub fn with_target_rtt(mut self, rtt: Duration) -> Self {
        self.target_rtt = rtt;
        self
    }

    pub fn with_idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval = interval;
        self
    }

    pub fn with_request_queue(mut self, capacity: usize) -> Self {
        self.request_queue = capacity.max(1);
        self
    }

    pub fn with_delivery_buffer(mut self, capacity: usize) -> Self {
        self.delivery_buffer = capacity.max(1);
        self
    }
}
