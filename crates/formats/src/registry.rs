use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use cascade::{CollaboratorError, LayerRegistry};
use catalog::ThemeCache;
use foundation::{LayerId, StyleId};
use layers::{LayerRecord, NormalizedStyle};
use parking_lot::Mutex;
use runtime::BoxFuture;
use serde_json::{Map, Value, json};

use crate::geojson::{feature_ids, geojson_bounds};
use crate::profile::ProfilePackage;

#[derive(Debug, Clone)]
struct LiveLayer {
    record: LayerRecord,
    rendered: bool,
    features: Vec<String>,
}

/// Layer registry over a profile package, loading layer data from disk
/// through the payload cache.
#[derive(Debug)]
pub struct ProfileLayerRegistry {
    package: ProfilePackage,
    cache: Arc<ThemeCache>,
    live: Mutex<BTreeMap<LayerId, LiveLayer>>,
}

impl ProfileLayerRegistry {
    pub fn new(package: ProfilePackage, cache: Arc<ThemeCache>) -> Self {
        Self {
            package,
            cache,
            live: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn package(&self) -> &ProfilePackage {
        &self.package
    }

    /// Materializes every layer flagged `preload`. Returns the failures.
    pub async fn preload(&self) -> Vec<(LayerId, CollaboratorError)> {
        let ids: Vec<LayerId> = self
            .package
            .manifest()
            .layers
            .iter()
            .filter(|e| e.preload)
            .map(|e| e.config.id.clone())
            .collect();
        let mut failures = Vec::new();
        for id in ids {
            if let Err(e) = self.materialize(&id).await {
                tracing::warn!(layer_id = %id, "preload failed: {e}");
                failures.push((id, e));
            }
        }
        failures
    }

    pub fn is_rendered(&self, id: &str) -> bool {
        self.live.lock().get(id).is_some_and(|l| l.rendered)
    }

    pub fn feature_count(&self, id: &str) -> Option<usize> {
        self.live.lock().get(id).map(|l| l.features.len())
    }

    async fn load_payload(&self, id: &LayerId, path: &Path) -> Result<Value, CollaboratorError> {
        let profile = self.package.profile();
        if let Some(hit) = self.cache.get(id, Some(profile)).await {
            tracing::debug!(layer_id = %id, "layer data served from cache");
            return Ok(hit);
        }

        let unavailable = |message: String| CollaboratorError::Unavailable {
            layer: id.clone(),
            message,
        };
        let payload = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| unavailable(format!("{}: {e}", path.display())))?;
        let data: Value = serde_json::from_str(&payload)
            .map_err(|e| unavailable(format!("{}: {e}", path.display())))?;

        let mut metadata = Map::new();
        metadata.insert("source".into(), json!(path.display().to_string()));
        self.cache.store(id, data.clone(), Some(profile), metadata).await;
        Ok(data)
    }
}

impl LayerRegistry for ProfileLayerRegistry {
    fn registered_layers(&self) -> Vec<LayerId> {
        self.live.lock().keys().cloned().collect()
    }

    fn layer(&self, id: &LayerId) -> Option<LayerRecord> {
        self.live.lock().get(id).map(|l| l.record.clone())
    }

    fn materialize<'a>(&'a self, id: &'a LayerId) -> BoxFuture<'a, Result<LayerRecord, CollaboratorError>> {
        Box::pin(async move {
            let existing = self.live.lock().get(id).map(|l| l.record.clone());
            if let Some(record) = existing {
                return Ok(record);
            }
            let entry = self
                .package
                .manifest()
                .entry(id.as_str())
                .ok_or_else(|| CollaboratorError::UnknownLayer(id.clone()))?;

            let mut record = LayerRecord::new(entry.config.clone());
            let mut features = Vec::new();
            if let Some(path) = self.package.data_path(id.as_str()) {
                let data = self.load_payload(id, &path).await?;
                features = feature_ids(&data);
                if record.bounds.is_none() {
                    record.bounds = geojson_bounds(&data);
                }
            }

            tracing::info!(layer_id = %id, features = features.len(), "layer materialized");
            let mut live = self.live.lock();
            let slot = live.entry(id.clone()).or_insert(LiveLayer {
                record,
                rendered: false,
                features,
            });
            Ok(slot.record.clone())
        })
    }

    fn feature_ids(&self, id: &LayerId) -> Vec<String> {
        self.live
            .lock()
            .get(id)
            .map(|l| l.features.clone())
            .unwrap_or_default()
    }

    fn set_rendered(&self, id: &LayerId, visible: bool) {
        if let Some(live) = self.live.lock().get_mut(id) {
            live.rendered = visible;
        }
    }

    fn apply_style(
        &self,
        id: &LayerId,
        style_id: &StyleId,
        style: &NormalizedStyle,
    ) -> Result<(), CollaboratorError> {
        let mut live = self.live.lock();
        let layer = live
            .get_mut(id)
            .ok_or_else(|| CollaboratorError::UnknownLayer(id.clone()))?;
        layer.record.current_style_id = Some(style_id.clone());
        layer.record.current_style = Some(style.clone());
        Ok(())
    }
}
