//! Client configuration.
//!
//! Every field has a default, so a config file only needs the keys it
//! overrides:
//! ```json
//! { "server_url": "ws://fleet.example:3000", "buffer": { "settle_delay_ms": 200 } }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Update buffer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Quiet period after `moveend` before queued updates are applied.
    pub settle_delay_ms: u64,
    /// Recenter the viewport on the first report that reaches the surface.
    /// Off by default; `fleet-viewer` turns it on.
    pub center_on_first_report: bool,
    /// Zoom level used for that first recenter.
    pub center_zoom: f64,
    /// Pin a marker at each vehicle's first reported position.
    /// Off by default; `fleet-viewer` turns it on.
    pub show_origin_markers: bool,
}

impl BufferConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 150,
            center_on_first_report: false,
            center_zoom: 14.0,
            show_origin_markers: false,
        }
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// WebSocket endpoint of the position server
    pub server_url: String,
    /// Fixed delay between reconnect attempts
    pub reconnect_delay_ms: u64,
    /// Capacity of the transport and command channels
    pub channel_capacity: usize,
    pub buffer: BufferConfig,
}

impl SyncConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Parse and validate a JSON config document.
    pub fn from_json_str(json: &str) -> SyncResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            return Err(SyncError::Config(format!(
                "server_url must be a ws:// or wss:// URL, got {:?}",
                self.server_url
            )));
        }
        if self.channel_capacity == 0 {
            return Err(SyncError::Config("channel_capacity must be non-zero".into()));
        }
        if !self.buffer.center_zoom.is_finite() {
            return Err(SyncError::Config("buffer.center_zoom must be finite".into()));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:3000".to_string(),
            reconnect_delay_ms: 1_000,
            channel_capacity: 256,
            buffer: BufferConfig::default(),
        }
    }
}
