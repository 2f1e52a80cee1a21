/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub const DEFAULT_REGION: &str = "us-west-2";
pub const DEFAULT_RELAY_WS: &str = "ws://127.0.0.1:8787";
pub const DEFAULT_ICE_URL: &str = "stun:stun.l.google.com:19302";

#[derive(Clone, Debug, serde::Deserialize)]
pub struct GatewayConfig {
    /// Signaling channel this gateway answers on.
    pub channel_name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default = "default_relay_ws")]
    pub relay_ws: String,
    #[serde(default)]
    pub relay_token: Option<String>,
    /// How often disconnected peers are swept (seconds).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Inbound relay frames buffered ahead of the router.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// A peer that has not connected after this long counts as idle.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_ice_urls")]
    pub ice_urls: Vec<String>,
    #[serde(default)]
    pub ice_username: Option<String>,
    #[serde(default)]
    pub ice_credential: Option<String>,
    /// Serial device streaming GGA sentences, e.g. `/dev/ttyUSB0`.
    #[serde(default)]
    pub gnss_port: Option<String>,
}

fn default_relay_ws() -> String {
    DEFAULT_RELAY_WS.to_string()
}

fn default_sweep_interval_secs() -> u64 {
    5
}

fn default_queue_depth() -> usize {
    256
}

fn default_connect_timeout_secs() -> u64 {
    20
}

fn default_ice_urls() -> Vec<String> {
    vec![DEFAULT_ICE_URL.to_string()]
}

fn trimmed(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl GatewayConfig {
    pub fn for_channel(channel_name: &str) -> Self {
        Self {
            channel_name: channel_name.to_string(),
            region: DEFAULT_REGION.to_string(),
            relay_ws: default_relay_ws(),
            relay_token: None,
            sweep_interval_secs: default_sweep_interval_secs(),
            queue_depth: default_queue_depth(),
            connect_timeout_secs: default_connect_timeout_secs(),
            ice_urls: default_ice_urls(),
            ice_username: None,
            ice_credential: None,
            gnss_port: None,
        }
    }

    /// Applies defaults and bounds. Fails only on a missing channel name.
    pub fn normalized(mut self) -> Result<Self> {
        self.channel_name = self.channel_name.trim().to_string();
        if self.channel_name.is_empty() {
            return Err(anyhow!("channel_name is required"));
        }
        self.region = self.region.trim().to_string();
        if self.region.is_empty() {
            self.region = DEFAULT_REGION.to_string();
        }
        self.relay_ws = self.relay_ws.trim().trim_end_matches('/').to_string();
        if self.relay_ws.is_empty() {
            self.relay_ws = default_relay_ws();
        }
        self.relay_token = trimmed(self.relay_token);
        self.sweep_interval_secs = self.sweep_interval_secs.clamp(1, 300);
        self.queue_depth = self.queue_depth.clamp(16, 8192);
        self.connect_timeout_secs = self.connect_timeout_secs.clamp(5, 120);
        self.ice_urls = self
            .ice_urls
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        self.ice_username = trimmed(self.ice_username);
        self.ice_credential = trimmed(self.ice_credential);
        self.gnss_port = trimmed(self.gnss_port);
        Ok(self)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: GatewayConfig = serde_json::from_str(text).context("invalid config json")?;
        cfg.normalized()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("load config: {}", path.display()))
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    if let Ok(v) = std::env::var("RTCGATE_CONFIG") {
        return Ok(PathBuf::from(v));
    }
    let proj = ProjectDirs::from("net", "rtcgate", "rtcgate")
        .context("unable to determine platform config dir")?;
    Ok(proj.config_dir().join("config.json"))
}
