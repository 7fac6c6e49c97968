use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

// Broker service configuration sourced from environment variables, with an
// optional YAML override file.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    // Session listener bind address.
    pub listen_bind: SocketAddr,
    // Metrics HTTP listener bind address.
    pub metrics_bind: SocketAddr,
    // Max frame payload accepted on sessions.
    pub max_frame_bytes: usize,
    // Per-topic replay ring capacity.
    pub ring_buffer_size: usize,
    // Per-subscriber delivery queue capacity.
    pub channel_buffer_size: usize,
    // Upper bound on the drain wait during stop, in seconds.
    pub graceful_shutdown_timeout_secs: u64,
    // Per-session outbound response queue depth.
    pub outbound_queue_depth: usize,
}

const DEFAULT_CONFIG_PATH: &str = "/usr/local/courier/config.yml";
const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;
const DEFAULT_RING_BUFFER_SIZE: usize = 100;
const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 100;
const DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
const DEFAULT_OUTBOUND_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Deserialize)]
struct ServiceConfigOverride {
    listen_bind: Option<String>,
    metrics_bind: Option<String>,
    max_frame_bytes: Option<usize>,
    ring_buffer_size: Option<usize>,
    channel_buffer_size: Option<usize>,
    graceful_shutdown_timeout_secs: Option<u64>,
    outbound_queue_depth: Option<usize>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_bind: "0.0.0.0:7410".parse().expect("default listen bind"),
            metrics_bind: "0.0.0.0:8080".parse().expect("default metrics bind"),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            ring_buffer_size: DEFAULT_RING_BUFFER_SIZE,
            channel_buffer_size: DEFAULT_CHANNEL_BUFFER_SIZE,
            graceful_shutdown_timeout_secs: DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECS,
            outbound_queue_depth: DEFAULT_OUTBOUND_QUEUE_DEPTH,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("COURIER_LISTEN_BIND") {
            config.listen_bind = value.parse().context("parse COURIER_LISTEN_BIND")?;
        }
        if let Ok(value) = std::env::var("COURIER_METRICS_BIND") {
            config.metrics_bind = value.parse().context("parse COURIER_METRICS_BIND")?;
        }
        if let Some(value) = env_usize("COURIER_MAX_FRAME_BYTES") {
            config.max_frame_bytes = value;
        }
        if let Some(value) = env_usize("COURIER_RING_BUFFER_SIZE") {
            config.ring_buffer_size = value;
        }
        if let Some(value) = env_usize("COURIER_CHANNEL_BUFFER_SIZE") {
            config.channel_buffer_size = value;
        }
        if let Some(value) = std::env::var("COURIER_SHUTDOWN_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
        {
            config.graceful_shutdown_timeout_secs = value;
        }
        if let Some(value) = env_usize("COURIER_OUTBOUND_QUEUE_DEPTH") {
            config.outbound_queue_depth = value;
        }
        Ok(config)
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        let override_path = std::env::var("COURIER_CONFIG").ok();
        let config_path = override_path
            .clone()
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        let contents = match fs::read_to_string(&config_path) {
            Ok(contents) => Some(contents),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                // An explicitly named file must exist; the default path is optional.
                if override_path.is_some() {
                    return Err(err).with_context(|| format!("read COURIER_CONFIG: {config_path}"));
                }
                None
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read broker config: {config_path}"));
            }
        };
        if let Some(contents) = contents {
            // YAML overrides allow ops-friendly config files.
            let override_cfg: ServiceConfigOverride =
                serde_yaml::from_str(&contents).context("parse broker config yaml")?;
            if let Some(value) = override_cfg.listen_bind {
                config.listen_bind = value.parse().context("parse listen_bind")?;
            }
            if let Some(value) = override_cfg.metrics_bind {
                config.metrics_bind = value.parse().context("parse metrics_bind")?;
            }
            if let Some(value) = override_cfg.max_frame_bytes.filter(|value| *value > 0) {
                config.max_frame_bytes = value;
            }
            if let Some(value) = override_cfg.ring_buffer_size.filter(|value| *value > 0) {
                config.ring_buffer_size = value;
            }
            if let Some(value) = override_cfg.channel_buffer_size.filter(|value| *value > 0) {
                config.channel_buffer_size = value;
            }
            if let Some(value) = override_cfg.graceful_shutdown_timeout_secs {
                config.graceful_shutdown_timeout_secs = value;
            }
            if let Some(value) = override_cfg.outbound_queue_depth.filter(|value| *value > 0) {
                config.outbound_queue_depth = value;
            }
        }
        Ok(config)
    }

    /// Registry configuration derived from the service knobs.
    pub fn broker_config(&self) -> Result<courier_broker::Config> {
        let config = courier_broker::Config::default()
            .with_ring_buffer_size(self.ring_buffer_size)?
            .with_channel_buffer_size(self.channel_buffer_size)?
            .with_graceful_shutdown_timeout(Duration::from_secs(
                self.graceful_shutdown_timeout_secs,
            ));
        Ok(config)
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
}
