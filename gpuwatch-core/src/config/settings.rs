//! Application settings
//!
//! Stored in `config.toml`; every field has a serde default so a partial or
//! missing file still yields a usable configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level settings consumed read-only by the monitoring core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Target host (hostname, IP, or `~/.ssh/config` alias)
    #[serde(default = "default_host")]
    pub host: String,
    /// Remote user; `None` lets ssh pick (current user or ssh config)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// Seconds between periodic refreshes (5–3600, default: 300)
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Upper bound for one fetch in seconds (1–120, default: 10)
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Show "62%/35%" next to the icon
    #[serde(default)]
    pub show_percentages: bool,
    /// Icon canvas edge in pixels (16–256, default: 36)
    #[serde(default = "default_icon_size")]
    pub icon_size: u32,
    /// SSH channel parameters
    #[serde(default)]
    pub channel: ChannelSettings,
}

fn default_host() -> String {
    "localhost".to_string()
}

const fn default_refresh_interval_secs() -> u64 {
    300
}

const fn default_fetch_timeout_secs() -> u64 {
    10
}

const fn default_icon_size() -> u32 {
    36
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            identity: None,
            refresh_interval_secs: default_refresh_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            show_percentages: false,
            icon_size: default_icon_size(),
            channel: ChannelSettings::default(),
        }
    }
}

impl AppSettings {
    /// Refresh interval clamped to 5–3600 seconds
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.clamp(5, 3600))
    }

    /// Fetch timeout clamped to 1–120 seconds
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.clamp(1, 120))
    }

    /// Icon size clamped to 16–256 pixels
    #[must_use]
    pub fn effective_icon_size(&self) -> u32 {
        self.icon_size.clamp(16, 256)
    }

    /// Remote user, treating an empty string as unset
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref().filter(|s| !s.is_empty())
    }
}

/// Parameters of the multiplexed SSH channel (stored under `[channel]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// SSH client binary
    #[serde(default = "default_ssh_program")]
    pub ssh_program: String,
    /// `ControlPersist`: idle seconds before the master exits (default: 600)
    #[serde(default = "default_persist_secs")]
    pub persist_secs: u64,
    /// `ServerAliveInterval` in seconds (default: 30)
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
    /// `ServerAliveCountMax`: missed keepalives before disconnect (default: 3)
    #[serde(default = "default_keepalive_count_max")]
    pub keepalive_count_max: u32,
    /// `ConnectTimeout` in seconds (default: 10)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Liveness probe timeout in seconds (1–5, default: 5)
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Teardown (`ssh -O exit`) timeout in seconds (default: 3)
    #[serde(default = "default_close_timeout_secs")]
    pub close_timeout_secs: u64,
    /// Private key passed with `-i`; `~` is expanded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

const fn default_persist_secs() -> u64 {
    600
}

const fn default_keepalive_interval_secs() -> u64 {
    30
}

const fn default_keepalive_count_max() -> u32 {
    3
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

const fn default_probe_timeout_secs() -> u64 {
    5
}

const fn default_close_timeout_secs() -> u64 {
    3
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            ssh_program: default_ssh_program(),
            persist_secs: default_persist_secs(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            keepalive_count_max: default_keepalive_count_max(),
            connect_timeout_secs: default_connect_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            close_timeout_secs: default_close_timeout_secs(),
            identity_file: None,
        }
    }
}

impl ChannelSettings {
    /// Probe timeout clamped to 1–5 seconds
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.clamp(1, 5))
    }

    /// Teardown timeout clamped to 1–10 seconds
    #[must_use]
    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs.clamp(1, 10))
    }

    /// Identity file with `~` and environment variables expanded
    #[must_use]
    pub fn expanded_identity_file(&self) -> Option<PathBuf> {
        let raw = self.identity_file.as_deref().filter(|s| !s.is_empty())?;
        let expanded = shellexpand::full(raw)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| raw.to_string());
        Some(PathBuf::from(expanded))
    }
}
