//! Viewer configuration: the client config plus the plates to track at startup.

use std::path::Path;

use anyhow::Context;
use fleet_sync::SyncConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unlike the library, the viewer centres on the first report and pins
/// origin markers unless the config file turns them off.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    #[serde(flatten)]
    pub sync: SyncConfig,
    /// Plates tracked as soon as the viewer starts.
    pub plates: Vec<String>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        let mut sync = SyncConfig::default();
        sync.buffer.center_on_first_report = true;
        sync.buffer.show_origin_markers = true;
        Self {
            sync,
            plates: Vec::new(),
        }
    }
}

impl ViewerConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let document: Value = serde_json::from_str(json).context("parsing viewer config")?;
        let mut config: Self =
            serde_json::from_value(document.clone()).context("parsing viewer config")?;

        // The flattened client config fills gaps from the library defaults.
        let unset = |flag: &str| document.pointer(&format!("/buffer/{flag}")).is_none();
        if unset("center_on_first_report") {
            config.sync.buffer.center_on_first_report = true;
        }
        if unset("show_origin_markers") {
            config.sync.buffer.show_origin_markers = true;
        }

        config.sync.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_json_str(&json)
    }
}
