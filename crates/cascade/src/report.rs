use foundation::{GeoBounds, LayerId, StyleId, ThemeId};
use serde::Serialize;

/// Phase of a theme application run.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyPhase {
    #[default]
    Idle,
    Resetting,
    HidingAll,
    ApplyingLayers,
    SyncingUi,
    Done,
    Cancelled,
}

/// What happened to one theme layer entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LayerOutcome {
    /// Shown; `style_id` is the style applied, if one was.
    Applied { style_id: Option<StyleId> },
    Hidden,
    /// A user choice kept the layer's visibility against the theme;
    /// `style_id` is the style applied, if one was.
    OverrideKept { style_id: Option<StyleId> },
    /// Shown, but the requested style is not declared by the layer.
    StyleSkipped { requested: StyleId },
    /// Layer could not be materialized; kept for a later retry.
    Deferred,
    /// Shown, but applying the style failed.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThemeRunReport {
    pub theme_id: ThemeId,
    pub outcomes: Vec<(LayerId, LayerOutcome)>,
    pub deferred: Vec<LayerId>,
    /// Visible layers drawn hidden because the map scale is outside their range.
    pub out_of_scale: Vec<LayerId>,
    pub fitted_bounds: Option<GeoBounds>,
    pub cancelled: bool,
}

impl ThemeRunReport {
    pub fn new(theme_id: ThemeId) -> Self {
        Self {
            theme_id,
            outcomes: Vec::new(),
            deferred: Vec::new(),
            out_of_scale: Vec::new(),
            fitted_bounds: None,
            cancelled: false,
        }
    }

    /// Last outcome recorded for `layer`.
    pub fn outcome(&self, layer: &str) -> Option<&LayerOutcome> {
        self.outcomes
            .iter()
            .rev()
            .find(|(id, _)| id.as_str() == layer)
            .map(|(_, o)| o)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&LayerId, &str)> {
        self.outcomes.iter().filter_map(|(id, o)| match o {
            LayerOutcome::Failed { reason } => Some((id, reason.as_str())),
            _ => None,
        })
    }

    pub(crate) fn record(&mut self, layer: LayerId, outcome: LayerOutcome) {
        if outcome == LayerOutcome::Deferred && !self.deferred.contains(&layer) {
            self.deferred.push(layer.clone());
        }
        self.outcomes.push((layer, outcome));
    }
}
