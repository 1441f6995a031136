use foundation::LayerId;
use layers::LayerConfig;
use serde::{Deserialize, Serialize};

pub const MANIFEST_VERSION: &str = "1.0";

/// Contents of a profile's `layers.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayerManifest {
    pub version: String,
    #[serde(default)]
    pub layers: Vec<LayerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LayerEntry {
    #[serde(flatten)]
    pub config: LayerConfig,
    /// GeoJSON payload, relative to the profile directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Registered when the session opens rather than on first use.
    #[serde(default)]
    pub preload: bool,
}

impl LayerManifest {
    pub fn new() -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            layers: Vec::new(),
        }
    }

    pub fn entry(&self, id: &str) -> Option<&LayerEntry> {
        self.layers.iter().find(|e| e.config.id.as_str() == id)
    }

    /// First id that appears more than once.
    pub fn duplicate_id(&self) -> Option<&LayerId> {
        self.layers.iter().enumerate().find_map(|(i, e)| {
            self.layers[..i]
                .iter()
                .any(|prev| prev.config.id == e.config.id)
                .then_some(&e.config.id)
        })
    }
}

impl Default for LayerManifest {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerEntry {
    pub fn new(config: LayerConfig) -> Self {
        Self {
            config,
            data: None,
            preload: false,
        }
    }
}
