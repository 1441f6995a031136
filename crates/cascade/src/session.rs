use std::sync::Arc;

use catalog::{CatalogueSource, ThemeCache, ThemeLoader};
use foundation::{LayerId, ProfileId};
use layers::{HatchPatternGenerator, LayerVisibilityManager, PatternSurface, VisibilitySource};
use runtime::{NoDelay, Sleeper, TokioSleeper};

use crate::applier::ThemeApplier;
use crate::collaborators::Collaborators;
use crate::config::CascadeConfig;
use crate::selector::ThemeSelector;

/// Journal length of the visibility event bus kept per session.
const VISIBILITY_JOURNAL: usize = 256;

/// All cascade state of one map, for one profile.
#[derive(Debug)]
pub struct MapSession {
    profile: ProfileId,
    visibility: Arc<LayerVisibilityManager>,
    patterns: Arc<HatchPatternGenerator>,
    loader: Arc<ThemeLoader>,
    cache: Arc<ThemeCache>,
    applier: Arc<ThemeApplier>,
    selector: ThemeSelector,
}

pub struct MapSessionBuilder {
    profile: ProfileId,
    source: Arc<dyn CatalogueSource>,
    collaborators: Collaborators,
    surface: Arc<dyn PatternSurface>,
    config: CascadeConfig,
    loader: Option<Arc<ThemeLoader>>,
    cache: Option<Arc<ThemeCache>>,
    sleeper: Arc<dyn Sleeper>,
}

impl MapSessionBuilder {
    pub fn config(mut self, config: CascadeConfig) -> Self {
        self.config = config;
        self
    }

    /// Shares a loader (and its memoized catalogues) with other sessions.
    pub fn loader(mut self, loader: Arc<ThemeLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn cache(mut self, cache: Arc<ThemeCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Attaches hatch patterns without waiting between attempts.
    pub fn without_retry_delay(mut self) -> Self {
        self.sleeper = Arc::new(NoDelay);
        self
    }

    pub fn build(self) -> MapSession {
        let visibility = Arc::new(LayerVisibilityManager::with_event_journal(VISIBILITY_JOURNAL));
        let patterns = Arc::new(HatchPatternGenerator::with_sleeper(
            self.surface,
            self.config.hatch_retry,
            self.sleeper,
        ));
        let loader = self
            .loader
            .unwrap_or_else(|| Arc::new(ThemeLoader::new(self.source)));
        let cache = self.cache.unwrap_or_else(|| Arc::new(ThemeCache::new(None)));
        let applier = Arc::new(ThemeApplier::new(
            self.profile.clone(),
            visibility.clone(),
            patterns.clone(),
            self.collaborators,
            self.config,
        ));
        let selector = ThemeSelector::new(self.profile.clone(), loader.clone(), applier.clone());
        tracing::debug!(profile = %self.profile, "map session created");

        MapSession {
            profile: self.profile,
            visibility,
            patterns,
            loader,
            cache,
            applier,
            selector,
        }
    }
}

impl MapSession {
    pub fn builder(
        profile: impl Into<ProfileId>,
        source: Arc<dyn CatalogueSource>,
        collaborators: Collaborators,
        surface: Arc<dyn PatternSurface>,
    ) -> MapSessionBuilder {
        MapSessionBuilder {
            profile: profile.into(),
            source,
            collaborators,
            surface,
            config: CascadeConfig::default(),
            loader: None,
            cache: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn profile(&self) -> &ProfileId {
        &self.profile
    }

    pub fn visibility(&self) -> &Arc<LayerVisibilityManager> {
        &self.visibility
    }

    pub fn patterns(&self) -> &Arc<HatchPatternGenerator> {
        &self.patterns
    }

    pub fn loader(&self) -> &Arc<ThemeLoader> {
        &self.loader
    }

    pub fn cache(&self) -> &Arc<ThemeCache> {
        &self.cache
    }

    pub fn applier(&self) -> &Arc<ThemeApplier> {
        &self.applier
    }

    pub fn selector(&self) -> &ThemeSelector {
        &self.selector
    }

    /// Records a visibility change made by the user, e.g. from a layer switcher.
    pub fn toggle_layer(&self, layer_id: &LayerId, visible: bool) -> bool {
        self.visibility
            .set_visibility(layer_id, visible, VisibilitySource::User)
    }

    /// Call once the render surface is mounted: attaches the hatch patterns
    /// that ran out of retries before. Returns how many were attached.
    pub fn surface_mounted(&self) -> usize {
        self.patterns.flush_pending()
    }

    /// Drops the memoized catalogue and cached payloads of `layers`, so the
    /// next theme selection reads everything afresh.
    pub async fn reload(&self, layers: &[LayerId]) {
        self.loader.clear_cache(Some(&self.profile));
        for layer in layers {
            self.cache.invalidate(layer).await;
        }
        tracing::info!(profile = %self.profile, layers = layers.len(), "session caches cleared");
    }
}
