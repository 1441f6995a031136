//! Time-limited cache of layer payloads on top of a [`LayerPayloadStore`].
//!
//! Persistence is best-effort: when no store is configured, or the store
//! fails, reads miss and writes are dropped. Callers never see an error.

use std::sync::Arc;
use std::time::Duration;

use foundation::{Clock, LayerId, ProfileId, SystemClock, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::LayerPayloadStore;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    #[serde(with = "ttl_secs", rename = "ttlSecs")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
        }
    }
}

mod ttl_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(ttl.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Envelope persisted for each cached layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub layer_id: LayerId,
    pub profile_id: Option<ProfileId>,
    pub data: Value,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

pub struct ThemeCache {
    store: Option<Arc<dyn LayerPayloadStore>>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl std::fmt::Debug for ThemeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThemeCache")
            .field("persistent", &self.store.is_some())
            .field("config", &self.config)
            .finish()
    }
}

fn cache_key(layer_id: &LayerId) -> String {
    format!("layer:{layer_id}")
}

impl ThemeCache {
    pub fn new(store: Option<Arc<dyn LayerPayloadStore>>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), CacheConfig::default())
    }

    pub fn with_clock(
        store: Option<Arc<dyn LayerPayloadStore>>,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Self {
        if store.is_none() {
            tracing::debug!("layer payload cache has no persistent store; caching disabled");
        }
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    /// Cached payload for `layer_id`, or `None` when absent, expired, written
    /// for a different profile, or unreadable.
    pub async fn get(&self, layer_id: &LayerId, profile_id: Option<&ProfileId>) -> Option<Value> {
        let store = self.store.as_ref()?;
        let key = cache_key(layer_id);
        let blob = match store.get(&key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(layer = %layer_id, "layer cache read failed: {e}");
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&blob) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(layer = %layer_id, "discarding unreadable layer cache entry: {e}");
                return None;
            }
        };

        if let Some(wanted) = profile_id
            && entry.profile_id.as_ref() != Some(wanted)
        {
            tracing::debug!(layer = %layer_id, profile = %wanted, "layer cache entry belongs to another profile");
            return None;
        }

        let age = self
            .clock
            .now()
            .saturating_since(Timestamp::from_millis(entry.timestamp));
        if age > self.config.ttl {
            tracing::debug!(layer = %layer_id, age_secs = age.as_secs(), "layer cache entry expired");
            if let Err(e) = store.delete(&key).await {
                tracing::warn!(layer = %layer_id, "failed to evict expired layer cache entry: {e}");
            }
            return None;
        }

        Some(entry.data)
    }

    pub async fn store(
        &self,
        layer_id: &LayerId,
        data: Value,
        profile_id: Option<&ProfileId>,
        metadata: Map<String, Value>,
    ) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let entry = CacheEntry {
            layer_id: layer_id.clone(),
            profile_id: profile_id.cloned(),
            data,
            timestamp: self.clock.now().as_millis(),
            metadata,
        };
        let blob = match serde_json::to_string(&entry) {
            Ok(blob) => blob,
            Err(e) => {
                tracing::warn!(layer = %layer_id, "failed to encode layer cache entry: {e}");
                return;
            }
        };
        if let Err(e) = store.put(&cache_key(layer_id), blob).await {
            tracing::warn!(layer = %layer_id, "layer cache write failed: {e}");
        }
    }

    pub async fn invalidate(&self, layer_id: &LayerId) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        match store.delete(&cache_key(layer_id)).await {
            Ok(removed) => tracing::debug!(layer = %layer_id, removed, "layer cache invalidated"),
            Err(e) => tracing::warn!(layer = %layer_id, "layer cache invalidation failed: {e}"),
        }
    }
}
