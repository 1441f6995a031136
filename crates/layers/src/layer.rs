use foundation::{GeoBounds, LayerId, StyleId};
use serde::{Deserialize, Serialize};

use crate::scale::is_scale_in_range;
use crate::symbology::NormalizedStyle;

/// One of the styles a layer declares as selectable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleOption {
    pub id: StyleId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Style document file name; defaults to `<id>.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl StyleOption {
    pub fn new(id: impl Into<StyleId>) -> Self {
        Self {
            id: id.into(),
            label: None,
            file: None,
        }
    }

    pub fn file_name(&self) -> String {
        self.file
            .clone()
            .unwrap_or_else(|| format!("{}.json", self.id))
    }
}

/// Static description of a registered layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerConfig {
    pub id: LayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub styles: Vec<StyleOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_style: Option<StyleId>,
    /// Directory (relative to the profile's style root) holding this layer's style files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_directory: Option<String>,
    /// Least detailed scale denominator at which the layer is drawn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_scale: Option<f64>,
    /// Most detailed scale denominator at which the layer is drawn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_scale: Option<f64>,
    #[serde(default)]
    pub labels: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<GeoBounds>,
}

impl LayerConfig {
    pub fn new(id: impl Into<LayerId>) -> Self {
        Self {
            id: id.into(),
            label: None,
            styles: Vec::new(),
            default_style: None,
            style_directory: None,
            min_scale: None,
            max_scale: None,
            labels: false,
            bounds: None,
        }
    }

    pub fn with_styles<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StyleId>,
    {
        self.styles = ids.into_iter().map(StyleOption::new).collect();
        self
    }

    pub fn with_scale_range(mut self, min_scale: Option<f64>, max_scale: Option<f64>) -> Self {
        self.min_scale = min_scale;
        self.max_scale = max_scale;
        self
    }

    pub fn style(&self, id: &str) -> Option<&StyleOption> {
        self.styles.iter().find(|s| s.id.as_str() == id)
    }

    pub fn visible_at_scale(&self, scale: f64) -> bool {
        is_scale_in_range(scale, self.min_scale, self.max_scale)
    }

    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(self.id.as_str())
    }
}

/// Live view of a layer held by the layer registry.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerRecord {
    pub config: LayerConfig,
    pub current_style_id: Option<StyleId>,
    /// Last normalized style applied by a cascade run.
    pub current_style: Option<NormalizedStyle>,
    pub bounds: Option<GeoBounds>,
}

impl LayerRecord {
    pub fn new(config: LayerConfig) -> Self {
        let bounds = config.bounds;
        Self {
            config,
            current_style_id: None,
            current_style: None,
            bounds,
        }
    }

    pub fn id(&self) -> &LayerId {
        &self.config.id
    }
}

#[cfg(test)]
mod tests {
    use super::{LayerConfig, StyleOption};

    #[test]
    fn layer_config_parses_camel_case() {
        let raw = r#"{
            "id": "trails",
            "styles": [{"id": "default"}, {"id": "night", "file": "dark.json"}],
            "defaultStyle": "default",
            "minScale": 15000000,
            "maxScale": 1000,
            "labels": true
        }"#;
        let cfg: LayerConfig = serde_json::from_str(raw).expect("parse");
        assert_eq!(cfg.id.as_str(), "trails");
        assert_eq!(cfg.styles.len(), 2);
        assert_eq!(cfg.style("night").map(StyleOption::file_name).as_deref(), Some("dark.json"));
        assert_eq!(cfg.style("default").map(StyleOption::file_name).as_deref(), Some("default.json"));
        assert!(cfg.labels);
        assert!(cfg.visible_at_scale(5_000_000.0));
        assert!(!cfg.visible_at_scale(20_000_000.0));
    }

    #[test]
    fn unbounded_layer_is_always_in_scale() {
        let cfg = LayerConfig::new("parks");
        assert!(cfg.visible_at_scale(1.0));
        assert!(cfg.visible_at_scale(1e9));
        assert_eq!(cfg.display_name(), "parks");
    }
}
