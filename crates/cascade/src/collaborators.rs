//! Contracts the cascade drives but does not implement.
//!
//! [`LayerRegistry`] and [`StyleLoader`] are required. The UI-facing sinks
//! are optional capabilities; each has a null object that ignores calls.

use std::sync::Arc;

use foundation::{GeoBounds, LayerId, ProfileId, StyleId};
use layers::{LayerConfig, LayerRecord, NormalizedStyle, StyleOption, Viewport};
use runtime::BoxFuture;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("layer {0} is not known to the registry")]
    UnknownLayer(LayerId),
    #[error("layer {layer} is unavailable: {message}")]
    Unavailable { layer: LayerId, message: String },
    #[error("render engine rejected layer {layer}: {message}")]
    Rejected { layer: LayerId, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StyleLoadError {
    #[error("style {style} of layer {layer} not found at {path}")]
    NotFound {
        layer: LayerId,
        style: StyleId,
        path: String,
    },
    #[error("failed to read style {style} of layer {layer}: {message}")]
    Io {
        layer: LayerId,
        style: StyleId,
        message: String,
    },
    #[error("style {style} of layer {layer} is not valid JSON: {message}")]
    Parse {
        layer: LayerId,
        style: StyleId,
        message: String,
    },
}

/// Map layers as seen by the render engine.
pub trait LayerRegistry: Send + Sync {
    /// Layers currently registered with the map.
    fn registered_layers(&self) -> Vec<LayerId>;

    fn layer(&self, id: &LayerId) -> Option<LayerRecord>;

    /// Loads and registers a layer that is not on the map yet.
    fn materialize<'a>(&'a self, id: &'a LayerId) -> BoxFuture<'a, Result<LayerRecord, CollaboratorError>>;

    /// Handles of the layer's rendered features, used to bind pattern fills.
    fn feature_ids(&self, id: &LayerId) -> Vec<String>;

    /// Shows or hides the layer in the render engine.
    fn set_rendered(&self, id: &LayerId, visible: bool);

    /// Renders `style` on the layer and records it as the layer's current style.
    fn apply_style(
        &self,
        id: &LayerId,
        style_id: &StyleId,
        style: &NormalizedStyle,
    ) -> Result<(), CollaboratorError>;
}

/// Fetches profile-scoped style documents.
pub trait StyleLoader: Send + Sync {
    fn load_style<'a>(
        &'a self,
        profile: &'a ProfileId,
        layer: &'a LayerConfig,
        style: &'a StyleOption,
    ) -> BoxFuture<'a, Result<Value, StyleLoadError>>;
}

pub trait LabelSink: Send + Sync {
    fn disable_labels(&self, layer: &LayerId);
    fn reinit_labels(&self, layer: &LayerId, style: Option<&NormalizedStyle>);
}

pub trait LegendSink: Send + Sync {
    fn load_legend(&self, layer: &LayerId, style_id: &StyleId, style: &NormalizedStyle);
    fn set_legend_visible(&self, layer: &LayerId, visible: bool);
}

pub trait ViewportController: Send + Sync {
    fn current_viewport(&self) -> Option<Viewport>;
    fn fit_bounds(&self, bounds: &GeoBounds);
}

/// Per-layer visual toggle, e.g. a "show labels" button.
pub trait LayerToggleSink: Send + Sync {
    fn refresh_toggle(&self, layer: &LayerId, visible: bool, labels_enabled: bool);
}

pub trait StyleSelectorSink: Send + Sync {
    fn set_active_style(&self, layer: &LayerId, style_id: Option<&StyleId>);
}

#[derive(Debug, Default, Copy, Clone)]
pub struct NoLabels;

impl LabelSink for NoLabels {
    fn disable_labels(&self, _layer: &LayerId) {}
    fn reinit_labels(&self, _layer: &LayerId, _style: Option<&NormalizedStyle>) {}
}

#[derive(Debug, Default, Copy, Clone)]
pub struct NoLegend;

impl LegendSink for NoLegend {
    fn load_legend(&self, _layer: &LayerId, _style_id: &StyleId, _style: &NormalizedStyle) {}
    fn set_legend_visible(&self, _layer: &LayerId, _visible: bool) {}
}

#[derive(Debug, Default, Copy, Clone)]
pub struct NoViewport;

impl ViewportController for NoViewport {
    fn current_viewport(&self) -> Option<Viewport> {
        None
    }

    fn fit_bounds(&self, _bounds: &GeoBounds) {}
}

#[derive(Debug, Default, Copy, Clone)]
pub struct NoToggles;

impl LayerToggleSink for NoToggles {
    fn refresh_toggle(&self, _layer: &LayerId, _visible: bool, _labels_enabled: bool) {}
}

#[derive(Debug, Default, Copy, Clone)]
pub struct NoStyleSelector;

impl StyleSelectorSink for NoStyleSelector {
    fn set_active_style(&self, _layer: &LayerId, _style_id: Option<&StyleId>) {}
}

/// Everything a cascade run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn LayerRegistry>,
    pub styles: Arc<dyn StyleLoader>,
    pub labels: Arc<dyn LabelSink>,
    pub legend: Arc<dyn LegendSink>,
    pub viewport: Arc<dyn ViewportController>,
    pub toggles: Arc<dyn LayerToggleSink>,
    pub style_selector: Arc<dyn StyleSelectorSink>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl Collaborators {
    pub fn new(registry: Arc<dyn LayerRegistry>, styles: Arc<dyn StyleLoader>) -> Self {
        Self {
            registry,
            styles,
            labels: Arc::new(NoLabels),
            legend: Arc::new(NoLegend),
            viewport: Arc::new(NoViewport),
            toggles: Arc::new(NoToggles),
            style_selector: Arc::new(NoStyleSelector),
        }
    }

    pub fn with_labels(mut self, labels: Arc<dyn LabelSink>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_legend(mut self, legend: Arc<dyn LegendSink>) -> Self {
        self.legend = legend;
        self
    }

    pub fn with_viewport(mut self, viewport: Arc<dyn ViewportController>) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn with_toggles(mut self, toggles: Arc<dyn LayerToggleSink>) -> Self {
        self.toggles = toggles;
        self
    }

    pub fn with_style_selector(mut self, style_selector: Arc<dyn StyleSelectorSink>) -> Self {
        self.style_selector = style_selector;
        self
    }
}
