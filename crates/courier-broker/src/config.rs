use std::time::Duration;

use crate::error::{RegistryError, Result};

pub const DEFAULT_RING_BUFFER_SIZE: usize = 100;
pub const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 100;
pub const DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Registry tuning knobs. Capacities are fixed for the registry's lifetime;
/// zero capacities are rejected up front.
#[derive(Debug, Clone)]
pub struct Config {
    /// Per-topic replay ring capacity.
    pub ring_buffer_size: usize,
    /// Per-subscriber delivery queue capacity.
    pub channel_buffer_size: usize,
    /// Upper bound on the drain wait during stop.
    pub graceful_shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ring_buffer_size: DEFAULT_RING_BUFFER_SIZE,
            channel_buffer_size: DEFAULT_CHANNEL_BUFFER_SIZE,
            graceful_shutdown_timeout: DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT,
        }
    }
}

impl Config {
    pub fn with_ring_buffer_size(mut self, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(RegistryError::InvalidCapacity("ring_buffer_size"));
        }
        self.ring_buffer_size = size;
        Ok(self)
    }

    pub fn with_channel_buffer_size(mut self, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(RegistryError::InvalidCapacity("channel_buffer_size"));
        }
        self.channel_buffer_size = size;
        Ok(self)
    }

    pub fn with_graceful_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_shutdown_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.ring_buffer_size, 100);
        assert_eq!(config.channel_buffer_size, 100);
        assert_eq!(config.graceful_shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn zero_capacities_are_rejected() {
        let err = Config::default()
            .with_ring_buffer_size(0)
            .expect_err("ring capacity");
        assert!(matches!(
            err,
            RegistryError::InvalidCapacity("ring_buffer_size")
        ));
        let err = Config::default()
            .with_channel_buffer_size(0)
            .expect_err("channel capacity");
        assert!(matches!(
            err,
            RegistryError::InvalidCapacity("channel_buffer_size")
        ));
    }
}
