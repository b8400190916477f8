//! Configuration loading and persistence.
//!
//! Handles reading and writing the handbridge configuration file and
//! turning it into a ready-to-use transport.

use std::sync::Arc;
use std::time::Duration;
use std::{fs, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::calibration::validate_name;
use crate::constants::{
    DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SEND_RATE_HZ, DEFAULT_SERVER_URL,
};
use crate::error::TransportError;
use crate::tracking::SkeletonLayout;
use crate::transport::{
    FrameSink, HttpSink, MemorySink, RetryPolicy, SendRate, Transport, TransportKind,
    WebSocketSink,
};

const CONFIG_FILE: &str = "config.json";

/// Configuration for the handbridge CLI.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Base URL of the robot-side receiver.
    pub server_url: String,
    /// Delivery backend.
    pub transport: TransportKind,
    /// Target send frequency in Hz (10-120).
    pub send_rate_hz: u32,
    /// Calibration profile loaded at session start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_profile: Option<String>,
    /// Provider joint layout.
    pub skeleton: SkeletonLayout,
    /// Per-message deadline in milliseconds.
    pub request_timeout_ms: u64,
    /// WebSocket keep-alive ping interval in seconds.
    pub keepalive_interval_secs: u64,
    /// Behaviour after a failed connect or send.
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            transport: TransportKind::Http,
            send_rate_hz: DEFAULT_SEND_RATE_HZ,
            active_profile: None,
            skeleton: SkeletonLayout::default(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            keepalive_interval_secs: DEFAULT_KEEPALIVE_INTERVAL.as_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `HANDBRIDGE_CONFIG_DIR` env var (`~` expanded)
    /// 2. Platform config dir (Linux: ~/.config/handbridge)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("HANDBRIDGE_CONFIG_DIR") {
            PathBuf::from(shellexpand::tilde(&dir).into_owned())
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("handbridge")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from the config directory, with environment
    /// variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_dir()?)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads `config.json` from `dir`; a missing file yields the defaults.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if !config_path.exists() {
            log::debug!("No config at {}, using defaults", config_path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `HANDBRIDGE_*` overrides looked up through `var`.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(server_url) = var("HANDBRIDGE_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Some(transport) = var("HANDBRIDGE_TRANSPORT") {
            match transport.parse() {
                Ok(kind) => self.transport = kind,
                Err(e) => log::warn!("Ignoring HANDBRIDGE_TRANSPORT: {}", e),
            }
        }

        if let Some(rate) = var("HANDBRIDGE_SEND_RATE_HZ") {
            match rate.parse::<u32>() {
                Ok(hz) => self.send_rate_hz = hz,
                Err(e) => log::warn!("Ignoring HANDBRIDGE_SEND_RATE_HZ={}: {}", rate, e),
            }
        }

        if let Some(profile) = var("HANDBRIDGE_PROFILE") {
            self.active_profile = (!profile.is_empty()).then_some(profile);
        }
    }

    /// Check every field; returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.send_rate()?;
        match self.transport {
            TransportKind::Http => {
                HttpSink::new(&self.server_url)?;
            }
            TransportKind::WebSocket => {
                WebSocketSink::new(&self.server_url)?;
            }
            TransportKind::Memory => {}
        }
        if let Some(profile) = &self.active_profile {
            validate_name(profile)?;
        }
        anyhow::ensure!(self.request_timeout_ms > 0, "request_timeout_ms must be positive");
        anyhow::ensure!(
            self.keepalive_interval_secs > 0,
            "keepalive_interval_secs must be positive"
        );
        Ok(())
    }

    /// Configured send rate, if within bounds.
    pub fn send_rate(&self) -> Result<SendRate> {
        SendRate::try_from(self.send_rate_hz).map_err(anyhow::Error::msg)
    }

    /// Per-message deadline.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Keep-alive ping interval.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    /// Build the sink for the configured backend.
    pub fn build_sink(&self) -> Result<Arc<dyn FrameSink>, TransportError> {
        let sink: Arc<dyn FrameSink> = match self.transport {
            TransportKind::Http => Arc::new(HttpSink::with_timeout(
                &self.server_url,
                self.request_timeout(),
            )?),
            TransportKind::WebSocket => Arc::new(
                WebSocketSink::new(&self.server_url)?
                    .with_keepalive(self.keepalive_interval())
                    .with_send_timeout(self.request_timeout()),
            ),
            TransportKind::Memory => Arc::new(MemorySink::new()),
        };
        Ok(sink)
    }

    /// Build an unconnected transport for the configured backend.
    pub fn build_transport(&self) -> Result<Transport, TransportError> {
        Ok(Transport::new(self.build_sink()?, self.retry))
    }

    /// Persists the configuration to the config directory.
    pub fn save(&self) -> Result<PathBuf> {
        self.save_to(&Self::config_dir()?)
    }

    /// Persists the configuration to `dir/config.json`.
    pub fn save_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let config_path = dir.join(CONFIG_FILE);
        fs::write(&config_path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(config_path)
    }
}
