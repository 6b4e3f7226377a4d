//! Pool configuration

use std::time::Duration;

use crate::relay::RelayConfig;

/// Lowest accepted concurrency budget
pub const MIN_CONCURRENT: usize = 1;

/// Highest accepted concurrency budget
pub const MAX_CONCURRENT: usize = 20;

/// Default concurrency budget
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Pool configuration options
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Configuration for every relay the pool creates
    pub relay: RelayConfig,

    /// Maximum simultaneously live relays, within `[1, 20]`
    pub max_concurrent: usize,

    /// Delay between the last release and teardown
    pub grace_period: Duration,

    /// An acquire this recent keeps a released relay alive at teardown time
    pub freshness_threshold: Duration,
}

impl PoolConfig {
    /// Create a config with default budget and timings
    pub fn new(relay: RelayConfig) -> Self {
        Self {
            relay,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            grace_period: Duration::from_secs(5),
            freshness_threshold: Duration::from_secs(1),
        }
    }

    /// Set the concurrency budget (clamped to `[1, 20]`)
    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = clamp_concurrency(max);
        self
    }

    /// Set the grace period
    pub fn grace_period(mut self, period: Duration) -> Self {
        self.grace_period = period;
        self
    }

    /// Set the freshness threshold
    pub fn freshness_threshold(mut self, threshold: Duration) -> Self {
        self.freshness_threshold = threshold;
        self
    }

    /// Replace the relay configuration
    pub fn relay(mut self, relay: RelayConfig) -> Self {
        self.relay = relay;
        self
    }
}

/// Clamp a concurrency budget to `[1, 20]`
pub fn clamp_concurrency(max: usize) -> usize {
    max.clamp(MIN_CONCURRENT, MAX_CONCURRENT)
}
