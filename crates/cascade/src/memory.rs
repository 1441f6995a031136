//! In-process registry and style loader, used for headless runs and tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use foundation::{LayerId, ProfileId, StyleId};
use layers::{LayerConfig, LayerRecord, NormalizedStyle, StyleOption};
use parking_lot::Mutex;
use runtime::BoxFuture;
use serde_json::Value;

use crate::collaborators::{CollaboratorError, LayerRegistry, StyleLoadError, StyleLoader};

#[derive(Debug, Clone)]
struct LiveLayer {
    record: LayerRecord,
    rendered: bool,
    style_history: Vec<StyleId>,
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Layers that can be materialized on demand.
    available: BTreeMap<LayerId, LayerConfig>,
    live: BTreeMap<LayerId, LiveLayer>,
    broken: BTreeSet<LayerId>,
    features: BTreeMap<LayerId, Vec<String>>,
    materializations: usize,
}

/// Layer registry backed by a map of configs.
#[derive(Debug, Default)]
pub struct InMemoryLayerRegistry {
    state: Mutex<RegistryState>,
}

impl InMemoryLayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `config` as already on the map.
    pub fn with_layer(self, config: LayerConfig) -> Self {
        self.register(config);
        self
    }

    /// Makes `config` available for on-demand materialization.
    pub fn with_available(self, config: LayerConfig) -> Self {
        self.state.lock().available.insert(config.id.clone(), config);
        self
    }

    /// Gives `id` the rendered feature handles `features`.
    pub fn with_features<I, S>(self, id: impl Into<LayerId>, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state
            .lock()
            .features
            .insert(id.into(), features.into_iter().map(Into::into).collect());
        self
    }

    pub fn register(&self, config: LayerConfig) {
        let mut state = self.state.lock();
        state.available.insert(config.id.clone(), config.clone());
        state.live.insert(
            config.id.clone(),
            LiveLayer {
                record: LayerRecord::new(config),
                rendered: false,
                style_history: Vec::new(),
            },
        );
    }

    /// Makes materialization of `id` fail until [`repair`] is called.
    ///
    /// [`repair`]: InMemoryLayerRegistry::repair
    pub fn break_layer(&self, id: impl Into<LayerId>) {
        self.state.lock().broken.insert(id.into());
    }

    pub fn repair(&self, id: &LayerId) {
        self.state.lock().broken.remove(id);
    }

    pub fn is_rendered(&self, id: &str) -> bool {
        self.state.lock().live.get(id).is_some_and(|l| l.rendered)
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.state.lock().live.contains_key(id)
    }

    /// Style ids applied to `id`, oldest first.
    pub fn style_history(&self, id: &str) -> Vec<StyleId> {
        self.state
            .lock()
            .live
            .get(id)
            .map(|l| l.style_history.clone())
            .unwrap_or_default()
    }

    pub fn materializations(&self) -> usize {
        self.state.lock().materializations
    }
}

impl LayerRegistry for InMemoryLayerRegistry {
    fn registered_layers(&self) -> Vec<LayerId> {
        self.state.lock().live.keys().cloned().collect()
    }

    fn layer(&self, id: &LayerId) -> Option<LayerRecord> {
        self.state.lock().live.get(id).map(|l| l.record.clone())
    }

    fn materialize<'a>(&'a self, id: &'a LayerId) -> BoxFuture<'a, Result<LayerRecord, CollaboratorError>> {
        let outcome = {
            let mut state = self.state.lock();
            state.materializations += 1;
            if state.broken.contains(id) {
                Err(CollaboratorError::Unavailable {
                    layer: id.clone(),
                    message: "layer data could not be loaded".to_string(),
                })
            } else if let Some(live) = state.live.get(id) {
                Ok(live.record.clone())
            } else if let Some(config) = state.available.get(id).cloned() {
                let record = LayerRecord::new(config);
                state.live.insert(
                    id.clone(),
                    LiveLayer {
                        record: record.clone(),
                        rendered: false,
                        style_history: Vec::new(),
                    },
                );
                Ok(record)
            } else {
                Err(CollaboratorError::UnknownLayer(id.clone()))
            }
        };
        Box::pin(async move { outcome })
    }

    fn feature_ids(&self, id: &LayerId) -> Vec<String> {
        let state = self.state.lock();
        if !state.live.contains_key(id) {
            return Vec::new();
        }
        state.features.get(id).cloned().unwrap_or_default()
    }

    fn set_rendered(&self, id: &LayerId, visible: bool) {
        if let Some(live) = self.state.lock().live.get_mut(id) {
            live.rendered = visible;
        }
    }

    fn apply_style(
        &self,
        id: &LayerId,
        style_id: &StyleId,
        style: &NormalizedStyle,
    ) -> Result<(), CollaboratorError> {
        let mut state = self.state.lock();
        let live = state
            .live
            .get_mut(id)
            .ok_or_else(|| CollaboratorError::UnknownLayer(id.clone()))?;
        live.record.current_style_id = Some(style_id.clone());
        live.record.current_style = Some(style.clone());
        live.style_history.push(style_id.clone());
        Ok(())
    }
}

/// Style documents keyed by `(layer, style)`.
#[derive(Debug, Default)]
pub struct StaticStyleLoader {
    documents: HashMap<(LayerId, StyleId), Value>,
    loads: Mutex<Vec<(ProfileId, LayerId, StyleId)>>,
}

impl StaticStyleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_style(mut self, layer: impl Into<LayerId>, style: impl Into<StyleId>, doc: Value) -> Self {
        self.documents.insert((layer.into(), style.into()), doc);
        self
    }

    /// Every load request served so far, in order.
    pub fn loads(&self) -> Vec<(ProfileId, LayerId, StyleId)> {
        self.loads.lock().clone()
    }
}

impl StyleLoader for StaticStyleLoader {
    fn load_style<'a>(
        &'a self,
        profile: &'a ProfileId,
        layer: &'a LayerConfig,
        style: &'a StyleOption,
    ) -> BoxFuture<'a, Result<Value, StyleLoadError>> {
        self.loads
            .lock()
            .push((profile.clone(), layer.id.clone(), style.id.clone()));
        let found = self
            .documents
            .get(&(layer.id.clone(), style.id.clone()))
            .cloned()
            .ok_or_else(|| StyleLoadError::NotFound {
                layer: layer.id.clone(),
                style: style.id.clone(),
                path: format!("{profile}/styles/{}/{}", layer.id, style.file_name()),
            });
        Box::pin(async move { found })
    }
}
