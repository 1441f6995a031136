//! Style descriptors and their normalization into flat render parameters.

use foundation::LayerId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::hatch::{PatternId, pattern_id};

pub const DEFAULT_COLOR: &str = "#3388ff";
pub const DEFAULT_FILL_OPACITY: f64 = 0.2;
pub const DEFAULT_OPACITY: f64 = 1.0;
pub const DEFAULT_WEIGHT: f64 = 3.0;
/// Fill opacity applied when a pattern-only hatch would otherwise be invisible.
pub const PATTERN_FILL_OPACITY: f64 = 1.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillDescriptor {
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub opacity: Option<f64>,
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokeDescriptor {
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub opacity: Option<f64>,
    #[serde(default)]
    pub width_px: Option<f64>,
    #[serde(default)]
    pub dash_array: Option<String>,
    #[serde(default)]
    pub line_cap: Option<String>,
    #[serde(default)]
    pub line_join: Option<String>,
}

/// Wider line drawn beneath a line feature to emulate a border.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CasingDescriptor {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub opacity: Option<f64>,
    #[serde(default)]
    pub width_px: Option<f64>,
    #[serde(default)]
    pub dash_array: Option<String>,
    #[serde(default)]
    pub line_cap: Option<String>,
    #[serde(default)]
    pub line_join: Option<String>,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HatchType {
    #[default]
    Diagonal,
    Horizontal,
    Vertical,
    Cross,
    X,
    Dot,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    #[default]
    Normal,
    /// Only the pattern is drawn; the flat fill carries no ink of its own.
    PatternOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HatchStroke {
    #[serde(default = "default_hatch_color")]
    pub color: String,
    #[serde(default = "one")]
    pub opacity: f64,
    #[serde(default = "one")]
    pub width_px: f64,
}

impl Default for HatchStroke {
    fn default() -> Self {
        Self {
            color: default_hatch_color(),
            opacity: 1.0,
            width_px: 1.0,
        }
    }
}

fn default_hatch_color() -> String {
    "#000000".to_string()
}

fn one() -> f64 {
    1.0
}

fn default_spacing() -> f64 {
    8.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HatchDescriptor {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "type", default)]
    pub kind: HatchType,
    #[serde(default)]
    pub angle_deg: Option<f64>,
    #[serde(default = "default_spacing")]
    pub spacing_px: f64,
    #[serde(default)]
    pub stroke: HatchStroke,
    #[serde(default)]
    pub render_mode: RenderMode,
}

impl HatchDescriptor {
    pub fn is_pattern_only(&self) -> bool {
        self.enabled && self.render_mode == RenderMode::PatternOnly
    }
}

/// Abstract, externally authored style for a layer (nested form).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<FillDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<StrokeDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub casing: Option<CasingDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hatch: Option<HatchDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_px: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CasingStyle {
    pub color: String,
    pub opacity: f64,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dash_array: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_cap: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_join: Option<String>,
}

/// Flat parameter set consumed by the render engine.
///
/// Legacy flat documents deserialize straight into this type; keys it does
/// not model are preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_opacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dash_array: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_cap: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_join: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<String>,
    #[serde(rename = "_casing", default, skip_serializing_if = "Option::is_none")]
    pub casing: Option<CasingStyle>,
    #[serde(rename = "_hatchPatternId", default, skip_serializing_if = "Option::is_none")]
    pub hatch_pattern_id: Option<PatternId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hatch: Option<HatchDescriptor>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NormalizedStyle {
    /// Hatch to draw, if any.
    pub fn active_hatch(&self) -> Option<&HatchDescriptor> {
        self.hatch.as_ref().filter(|h| h.enabled)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StyleParseError {
    #[error("style document must be a JSON object")]
    NotAnObject,
    #[error("invalid style document: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Keys that mark the nested descriptor form; legacy flat styles use none of them.
const NESTED_KEYS: [&str; 4] = ["fill", "stroke", "casing", "hatch"];

/// Whether `doc` is written in the nested `{fill, stroke, ...}` form.
pub fn is_nested_descriptor(doc: &Map<String, Value>) -> bool {
    NESTED_KEYS.iter().any(|k| doc.contains_key(*k))
}

/// Normalizes a raw style document of either form.
pub fn normalize_value(doc: &Value, layer_id: &LayerId) -> Result<NormalizedStyle, StyleParseError> {
    let Value::Object(map) = doc else {
        return Err(StyleParseError::NotAnObject);
    };
    if is_nested_descriptor(map) {
        let descriptor: StyleDescriptor = serde_json::from_value(doc.clone())?;
        Ok(normalize(&descriptor, layer_id))
    } else {
        Ok(flat_style(map))
    }
}

/// Reads a legacy flat document. Never fails: a key whose value does not fit
/// the modelled field is kept verbatim in `extra`, so the document serializes
/// back unchanged.
fn flat_style(map: &Map<String, Value>) -> NormalizedStyle {
    let mut typed = Map::new();
    let mut verbatim = Map::new();
    for (key, value) in map {
        let single = Value::Object(Map::from_iter([(key.clone(), value.clone())]));
        if serde_json::from_value::<NormalizedStyle>(single).is_ok() {
            typed.insert(key.clone(), value.clone());
        } else {
            tracing::debug!(key = key.as_str(), "legacy style key kept verbatim");
            verbatim.insert(key.clone(), value.clone());
        }
    }
    let mut style: NormalizedStyle = serde_json::from_value(Value::Object(typed)).unwrap_or_default();
    style.extra.extend(verbatim);
    style
}

/// Converts a nested descriptor into the flat render parameter set.
///
/// Deterministic: the same descriptor and layer always produce the same
/// output, including the hatch pattern id.
pub fn normalize(descriptor: &StyleDescriptor, layer_id: &LayerId) -> NormalizedStyle {
    let fill = descriptor.fill.clone().unwrap_or_default();
    let stroke = descriptor.stroke.clone().unwrap_or_default();

    let mut out = NormalizedStyle {
        fill_color: fill.color.clone().or_else(|| stroke.color.clone()),
        fill_opacity: Some(fill.opacity.unwrap_or(DEFAULT_FILL_OPACITY)),
        fill_pattern: fill.pattern.clone(),
        color: Some(stroke.color.clone().unwrap_or_else(|| DEFAULT_COLOR.to_string())),
        opacity: Some(stroke.opacity.unwrap_or(DEFAULT_OPACITY)),
        weight: Some(stroke.width_px.unwrap_or(DEFAULT_WEIGHT)),
        dash_array: stroke.dash_array.clone(),
        line_cap: stroke.line_cap.clone(),
        line_join: stroke.line_join.clone(),
        radius: descriptor.size_px.map(|s| s / 2.0),
        shape: descriptor.shape.clone(),
        ..NormalizedStyle::default()
    };
    if out.fill_color.is_none() {
        out.fill_color = Some(DEFAULT_COLOR.to_string());
    }

    if let Some(casing) = descriptor.casing.as_ref().filter(|c| c.enabled) {
        let line_weight = out.weight.unwrap_or(DEFAULT_WEIGHT);
        out.casing = Some(CasingStyle {
            color: casing.color.clone().unwrap_or_else(|| "#000000".to_string()),
            opacity: casing.opacity.unwrap_or(DEFAULT_OPACITY),
            weight: casing.width_px.unwrap_or(line_weight + 2.0),
            dash_array: casing.dash_array.clone(),
            line_cap: casing.line_cap.clone().or_else(|| out.line_cap.clone()),
            line_join: casing.line_join.clone().or_else(|| out.line_join.clone()),
        });
    }

    if let Some(hatch) = descriptor.hatch.as_ref().filter(|h| h.enabled) {
        out.hatch_pattern_id = Some(pattern_id(layer_id, hatch));
        if hatch.render_mode == RenderMode::PatternOnly {
            // A zero-opacity fill hides the pattern painted through it.
            if !out.fill_opacity.is_some_and(|o| o > 0.0) {
                out.fill_opacity = Some(PATTERN_FILL_OPACITY);
            }
            if fill.color.is_none() {
                out.fill_color = Some(hatch.stroke.color.clone());
            }
        }
        out.hatch = Some(hatch.clone());
    }

    out
}

/// Per-category (taxonomy) colors used by the marker/feature pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryStyle {
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub fill_color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureColors {
    pub stroke: String,
    pub fill: String,
}

impl Default for FeatureColors {
    fn default() -> Self {
        Self {
            stroke: DEFAULT_COLOR.to_string(),
            fill: DEFAULT_COLOR.to_string(),
        }
    }
}

/// Resolves feature colors: layer style, then category style, then defaults.
pub fn resolve_feature_colors(
    layer: Option<&NormalizedStyle>,
    category: Option<&CategoryStyle>,
    defaults: &FeatureColors,
) -> FeatureColors {
    let stroke = layer
        .and_then(|l| l.color.clone())
        .or_else(|| category.and_then(|c| c.color.clone()))
        .unwrap_or_else(|| defaults.stroke.clone());
    let fill = layer
        .and_then(|l| l.fill_color.clone())
        .or_else(|| category.and_then(|c| c.fill_color.clone().or_else(|| c.color.clone())))
        .unwrap_or_else(|| defaults.fill.clone());
    FeatureColors { stroke, fill }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn layer() -> LayerId {
        LayerId::new("parks")
    }

    #[test]
    fn nested_descriptor_flattens() {
        let doc = json!({
            "fill": {"color": "#00ff00", "opacity": 0.4},
            "stroke": {"color": "#004400", "opacity": 0.9, "widthPx": 2, "dashArray": "4 2", "lineCap": "round"}
        });
        let style = normalize_value(&doc, &layer()).expect("normalize");
        assert_eq!(style.fill_color.as_deref(), Some("#00ff00"));
        assert_eq!(style.fill_opacity, Some(0.4));
        assert_eq!(style.color.as_deref(), Some("#004400"));
        assert_eq!(style.opacity, Some(0.9));
        assert_eq!(style.weight, Some(2.0));
        assert_eq!(style.dash_array.as_deref(), Some("4 2"));
        assert_eq!(style.line_cap.as_deref(), Some("round"));
        assert!(style.casing.is_none());
        assert!(style.hatch_pattern_id.is_none());
    }

    #[test]
    fn legacy_flat_style_is_copied_through() {
        let doc = json!({"color": "#ff0000", "weight": 5.0, "fillOpacity": 0.1, "className": "legacy"});
        let style = normalize_value(&doc, &layer()).expect("normalize");
        assert_eq!(style.color.as_deref(), Some("#ff0000"));
        assert_eq!(style.weight, Some(5.0));
        assert_eq!(style.fill_opacity, Some(0.1));
        assert_eq!(style.fill_color, None);
        assert_eq!(style.extra.get("className"), Some(&json!("legacy")));
        assert_eq!(serde_json::to_value(&style).unwrap(), doc);
    }

    #[test]
    fn mistyped_legacy_keys_are_kept_verbatim() {
        let doc = json!({"color": "#ff0000", "weight": "3", "dashArray": [4, 2], "_casing": true});
        let style = normalize_value(&doc, &layer()).expect("flat styles never fail");
        assert_eq!(style.color.as_deref(), Some("#ff0000"));
        assert_eq!(style.weight, None);
        assert_eq!(style.dash_array, None);
        assert_eq!(style.casing, None);
        assert_eq!(style.extra.get("weight"), Some(&json!("3")));
        assert_eq!(style.extra.get("dashArray"), Some(&json!([4, 2])));
        assert_eq!(serde_json::to_value(&style).unwrap(), doc);
    }

    #[test]
    fn non_object_documents_are_rejected() {
        assert!(matches!(
            normalize_value(&json!([1, 2]), &layer()),
            Err(StyleParseError::NotAnObject)
        ));
    }

    #[test]
    fn casing_only_when_enabled() {
        let mut d = StyleDescriptor {
            stroke: Some(StrokeDescriptor {
                width_px: Some(4.0),
                line_join: Some("round".to_string()),
                ..Default::default()
            }),
            casing: Some(CasingDescriptor {
                enabled: false,
                color: Some("#222".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(normalize(&d, &layer()).casing.is_none());

        d.casing.as_mut().unwrap().enabled = true;
        let casing = normalize(&d, &layer()).casing.expect("casing");
        assert_eq!(casing.color, "#222");
        assert_eq!(casing.weight, 6.0);
        assert_eq!(casing.line_join.as_deref(), Some("round"));
    }

    #[test]
    fn pattern_only_forces_visible_fill() {
        let doc = json!({
            "fill": {"opacity": 0},
            "hatch": {
                "enabled": true,
                "type": "diagonal",
                "spacingPx": 6,
                "stroke": {"color": "#123456", "opacity": 1, "widthPx": 1},
                "renderMode": "pattern_only"
            }
        });
        let style = normalize_value(&doc, &layer()).expect("normalize");
        assert!(style.fill_opacity.unwrap() > 0.0);
        assert_eq!(style.fill_color.as_deref(), Some("#123456"));
        assert!(style.hatch_pattern_id.is_some());
    }

    #[test]
    fn normal_hatch_keeps_authored_fill() {
        let doc = json!({
            "fill": {"color": "#ffffff", "opacity": 0},
            "hatch": {"enabled": true, "type": "cross"}
        });
        let style = normalize_value(&doc, &layer()).expect("normalize");
        assert_eq!(style.fill_opacity, Some(0.0));
        assert_eq!(style.fill_color.as_deref(), Some("#ffffff"));
        assert!(style.active_hatch().is_some());
    }

    #[test]
    fn hatch_only_document_counts_as_nested() {
        let doc = json!({"hatch": {"enabled": true, "type": "dot", "spacingPx": 8,
            "stroke": {"color": "#000", "opacity": 1, "widthPx": 1}}});
        let a = normalize_value(&doc, &layer()).expect("normalize");
        let b = normalize_value(&doc, &layer()).expect("normalize");
        assert!(a.hatch_pattern_id.is_some());
        assert_eq!(a.hatch_pattern_id, b.hatch_pattern_id);
        assert_eq!(a, b);
    }

    #[test]
    fn disabled_hatch_is_dropped() {
        let doc = json!({"fill": {"color": "#abc"}, "hatch": {"enabled": false, "type": "x"}});
        let style = normalize_value(&doc, &layer()).expect("normalize");
        assert!(style.hatch.is_none());
        assert!(style.hatch_pattern_id.is_none());
    }

    #[test]
    fn point_size_becomes_radius() {
        let d = StyleDescriptor {
            fill: Some(FillDescriptor::default()),
            shape: Some("circle".to_string()),
            size_px: Some(12.0),
            ..Default::default()
        };
        let style = normalize(&d, &layer());
        assert_eq!(style.radius, Some(6.0));
        assert_eq!(style.shape.as_deref(), Some("circle"));
    }

    #[test]
    fn feature_colors_follow_priority() {
        let defaults = FeatureColors::default();
        let category = CategoryStyle {
            color: Some("#cat".to_string()),
            fill_color: None,
        };
        let layer_style = NormalizedStyle {
            color: Some("#layer".to_string()),
            ..Default::default()
        };

        let c = resolve_feature_colors(Some(&layer_style), Some(&category), &defaults);
        assert_eq!(c.stroke, "#layer");
        assert_eq!(c.fill, "#cat");

        let c = resolve_feature_colors(None, Some(&category), &defaults);
        assert_eq!(c.stroke, "#cat");

        let c = resolve_feature_colors(None, None, &defaults);
        assert_eq!(c, defaults);
    }
}
