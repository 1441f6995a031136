//! Theme catalogue model and validation.

use foundation::{LayerId, ProfileId, StyleId, ThemeId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ThemeLoadError;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeType {
    #[default]
    Primary,
    Secondary,
}

/// One per-layer directive of a theme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeLayer {
    pub id: LayerId,
    /// Listing a layer without `visible` shows it.
    #[serde(default = "shown")]
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<StyleId>,
}

fn shown() -> bool {
    true
}

impl ThemeLayer {
    pub fn shown(id: impl Into<LayerId>, style: Option<&str>) -> Self {
        Self {
            id: id.into(),
            visible: true,
            style: style.map(StyleId::from),
        }
    }

    pub fn hidden(id: impl Into<LayerId>) -> Self {
        Self {
            id: id.into(),
            visible: false,
            style: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeDefinition {
    pub id: ThemeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: ThemeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub layers: Vec<ThemeLayer>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedTheme {
    #[error("theme id is empty")]
    EmptyId,
    #[error("theme {theme} has a layer entry with an empty id at position {index}")]
    EmptyLayerId { theme: ThemeId, index: usize },
}

impl ThemeDefinition {
    pub fn new(id: impl Into<ThemeId>, layers: Vec<ThemeLayer>) -> Self {
        Self {
            id: id.into(),
            label: None,
            kind: ThemeType::Primary,
            description: None,
            icon: None,
            layers,
        }
    }

    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(self.id.as_str())
    }

    /// Structural check run before a theme is applied.
    pub fn validate(&self) -> Result<(), MalformedTheme> {
        if self.id.is_empty() {
            return Err(MalformedTheme::EmptyId);
        }
        if let Some(index) = self.layers.iter().position(|l| l.id.is_empty()) {
            return Err(MalformedTheme::EmptyLayerId {
                theme: self.id.clone(),
                index,
            });
        }
        Ok(())
    }
}

/// Placement of one selector group (primary or secondary themes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorGroupConfig {
    #[serde(default = "shown")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for SelectorGroupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            position: None,
            label: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectorUiConfig {
    #[serde(default)]
    pub primary: SelectorGroupConfig,
    #[serde(default)]
    pub secondary: SelectorGroupConfig,
}

/// Validated theme catalogue of one profile. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeCatalogue {
    pub profile_id: ProfileId,
    /// Always names a theme present in `themes`.
    pub default_theme: ThemeId,
    pub themes: Vec<ThemeDefinition>,
    pub ui: SelectorUiConfig,
}

impl ThemeCatalogue {
    pub fn theme(&self, id: &str) -> Option<&ThemeDefinition> {
        self.themes.iter().find(|t| t.id.as_str() == id)
    }

    pub fn default_definition(&self) -> Option<&ThemeDefinition> {
        self.theme(self.default_theme.as_str())
            .or_else(|| self.themes.first())
    }

    pub fn themes_of(&self, kind: ThemeType) -> impl Iterator<Item = &ThemeDefinition> {
        self.themes.iter().filter(move |t| t.kind == kind)
    }

    pub fn primary_themes(&self) -> Vec<&ThemeDefinition> {
        self.themes_of(ThemeType::Primary).collect()
    }

    pub fn secondary_themes(&self) -> Vec<&ThemeDefinition> {
        self.themes_of(ThemeType::Secondary).collect()
    }
}

/// Parses and validates a raw catalogue document.
pub fn parse_catalogue(profile: &ProfileId, raw: &str) -> Result<ThemeCatalogue, ThemeLoadError> {
    let doc: Value = serde_json::from_str(raw).map_err(|e| ThemeLoadError::Parse {
        profile: profile.clone(),
        message: e.to_string(),
    })?;
    validate_catalogue(profile, doc)
}

/// Validates a catalogue document.
///
/// Theme entries without an id (or that fail to deserialize) are dropped with
/// a warning, as are layer entries without an id. A missing or dangling
/// `defaultTheme` falls back to the first theme. An empty theme list is fatal.
pub fn validate_catalogue(profile: &ProfileId, doc: Value) -> Result<ThemeCatalogue, ThemeLoadError> {
    let Value::Object(mut root) = doc else {
        return Err(ThemeLoadError::NotAnObject {
            profile: profile.clone(),
        });
    };

    let raw_themes = match root.remove("themes") {
        Some(Value::Array(items)) => items,
        Some(_) => {
            tracing::warn!(profile = %profile, "catalogue `themes` is not a list");
            Vec::new()
        }
        None => Vec::new(),
    };

    let mut themes: Vec<ThemeDefinition> = Vec::with_capacity(raw_themes.len());
    for (index, raw) in raw_themes.into_iter().enumerate() {
        let Some(theme) = normalize_theme_entry(profile, index, raw) else {
            continue;
        };
        if themes.iter().any(|t| t.id == theme.id) {
            tracing::warn!(profile = %profile, theme = %theme.id, "duplicate theme id dropped");
            continue;
        }
        themes.push(theme);
    }

    if themes.is_empty() {
        return Err(ThemeLoadError::NoThemes {
            profile: profile.clone(),
        });
    }

    let requested_default = root
        .get("defaultTheme")
        .and_then(Value::as_str)
        .map(str::to_string);
    let default_theme = match requested_default {
        Some(id) if themes.iter().any(|t| t.id.as_str() == id) => ThemeId::new(id),
        Some(id) => {
            tracing::warn!(
                profile = %profile,
                requested = %id,
                fallback = %themes[0].id,
                "default theme not found, using first theme"
            );
            themes[0].id.clone()
        }
        None => themes[0].id.clone(),
    };

    let ui = match root.remove("ui") {
        Some(v) => serde_json::from_value(v).unwrap_or_else(|e| {
            tracing::warn!(profile = %profile, "ignoring invalid selector ui config: {e}");
            SelectorUiConfig::default()
        }),
        None => SelectorUiConfig::default(),
    };

    Ok(ThemeCatalogue {
        profile_id: profile.clone(),
        default_theme,
        themes,
        ui,
    })
}

fn normalize_theme_entry(profile: &ProfileId, index: usize, raw: Value) -> Option<ThemeDefinition> {
    let Value::Object(mut entry) = raw else {
        tracing::warn!(profile = %profile, index, "theme entry is not an object, dropped");
        return None;
    };

    let has_id = entry
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty());
    if !has_id {
        tracing::warn!(profile = %profile, index, "theme entry without id dropped");
        return None;
    }

    if let Some(Value::Array(layers)) = entry.get_mut("layers") {
        let before = layers.len();
        layers.retain(|l| {
            l.get("id")
                .and_then(Value::as_str)
                .is_some_and(|s| !s.trim().is_empty())
        });
        let dropped = before - layers.len();
        if dropped > 0 {
            tracing::warn!(profile = %profile, index, dropped, "theme layer entries without id dropped");
        }
    }

    match serde_json::from_value::<ThemeDefinition>(Value::Object(entry)) {
        Ok(theme) => Some(theme),
        Err(e) => {
            tracing::warn!(profile = %profile, index, "invalid theme entry dropped: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn profile() -> ProfileId {
        ProfileId::new("alps")
    }

    #[test]
    fn parses_minimal_catalogue() {
        let raw = r#"{"defaultTheme":"summer","themes":[{"id":"summer","type":"primary",
            "layers":[{"id":"trails","visible":true,"style":"default"}]}]}"#;
        let cat = parse_catalogue(&profile(), raw).expect("parse");
        assert_eq!(cat.default_theme.as_str(), "summer");
        let summer = cat.default_definition().expect("default theme");
        assert_eq!(summer.layers, vec![ThemeLayer::shown("trails", Some("default"))]);
        assert_eq!(summer.kind, ThemeType::Primary);
    }

    #[test]
    fn drops_entries_without_id() {
        let doc = json!({
            "themes": [
                {"label": "no id"},
                {"id": "", "layers": []},
                "not an object",
                {"id": "winter", "type": "secondary", "layers": [{"visible": true}, {"id": "parks"}]}
            ]
        });
        let cat = validate_catalogue(&profile(), doc).expect("validate");
        assert_eq!(cat.themes.len(), 1);
        let winter = &cat.themes[0];
        assert_eq!(winter.id.as_str(), "winter");
        assert_eq!(winter.kind, ThemeType::Secondary);
        assert_eq!(winter.layers, vec![ThemeLayer::shown("parks", None)]);
        assert_eq!(cat.default_theme.as_str(), "winter");
    }

    #[test]
    fn dangling_default_falls_back_to_first() {
        let doc = json!({"defaultTheme": "ghost", "themes": [{"id": "a"}, {"id": "b"}]});
        let cat = validate_catalogue(&profile(), doc).expect("validate");
        assert_eq!(cat.default_theme.as_str(), "a");
    }

    #[test]
    fn empty_theme_list_is_fatal() {
        let err = validate_catalogue(&profile(), json!({"themes": [{"label": "x"}]})).unwrap_err();
        assert_eq!(err, ThemeLoadError::NoThemes { profile: profile() });

        let err = validate_catalogue(&profile(), json!({})).unwrap_err();
        assert!(matches!(err, ThemeLoadError::NoThemes { .. }));
    }

    #[test]
    fn non_object_and_unparseable_documents_are_fatal() {
        assert!(matches!(
            validate_catalogue(&profile(), json!([1])),
            Err(ThemeLoadError::NotAnObject { .. })
        ));
        assert!(matches!(
            parse_catalogue(&profile(), "{not json"),
            Err(ThemeLoadError::Parse { .. })
        ));
    }

    #[test]
    fn duplicate_theme_ids_keep_first() {
        let doc = json!({"themes": [{"id": "a", "label": "first"}, {"id": "a", "label": "second"}]});
        let cat = validate_catalogue(&profile(), doc).expect("validate");
        assert_eq!(cat.themes.len(), 1);
        assert_eq!(cat.themes[0].display_name(), "first");
    }

    #[test]
    fn ui_groups_and_type_filters() {
        let doc = json!({
            "themes": [{"id": "a"}, {"id": "b", "type": "secondary"}, {"id": "c"}],
            "ui": {"primary": {"position": "topright"}, "secondary": {"enabled": false, "columns": 2}}
        });
        let cat = validate_catalogue(&profile(), doc).expect("validate");
        let primary: Vec<&str> = cat.primary_themes().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(primary, vec!["a", "c"]);
        assert_eq!(cat.secondary_themes().len(), 1);
        assert_eq!(cat.ui.primary.position.as_deref(), Some("topright"));
        assert!(!cat.ui.secondary.enabled);
        assert_eq!(cat.ui.secondary.extra.get("columns"), Some(&json!(2)));
    }

    #[test]
    fn validate_flags_empty_ids() {
        let t = ThemeDefinition::new("", vec![]);
        assert_eq!(t.validate(), Err(MalformedTheme::EmptyId));

        let t = ThemeDefinition::new("x", vec![ThemeLayer::hidden("ok"), ThemeLayer::hidden(" ")]);
        assert!(matches!(
            t.validate(),
            Err(MalformedTheme::EmptyLayerId { index: 1, .. })
        ));
    }
}
