//! Theme application: cascades one theme definition over every layer.
//!
//! A run moves through `Resetting → HidingAll → ApplyingLayers → SyncingUi →
//! Done`. Layer steps are independent: a failure is logged and recorded in
//! the [`ThemeRunReport`], and the run carries on with the next layer.

use std::collections::BTreeMap;
use std::sync::Arc;

use catalog::{ThemeDefinition, ThemeLayer};
use foundation::{GeoBounds, LayerId, ProfileId, StyleId, ThemeId};
use layers::{
    HatchPatternGenerator, LayerConfig, LayerRecord, LayerVisibilityManager, NormalizedStyle,
    StyleOption, VisibilitySource, calculate_map_scale, normalize_value,
};
use parking_lot::Mutex;
use runtime::{CancellationToken, Cancelled};

use crate::collaborators::Collaborators;
use crate::config::CascadeConfig;
use crate::error::CascadeError;
use crate::report::{ApplyPhase, LayerOutcome, ThemeRunReport};

#[derive(Debug, Clone)]
struct DeferredLayer {
    theme_id: ThemeId,
    entry: ThemeLayer,
}

#[derive(Debug, Clone)]
struct AppliedStyle {
    layer: LayerId,
    style_id: StyleId,
    style: NormalizedStyle,
}

struct LayerStep {
    outcome: LayerOutcome,
    applied: Option<AppliedStyle>,
    visible: bool,
}

impl LayerStep {
    fn bare(outcome: LayerOutcome, visible: bool) -> Self {
        Self {
            outcome,
            applied: None,
            visible,
        }
    }
}

/// Phase of the latest run; superseded runs no longer write it.
#[derive(Debug, Default)]
struct RunPhase {
    run: u64,
    phase: ApplyPhase,
}

enum StyleFailure {
    Cancelled,
    Failed(String),
}

impl From<Cancelled> for StyleFailure {
    fn from(_: Cancelled) -> Self {
        StyleFailure::Cancelled
    }
}

pub struct ThemeApplier {
    profile: ProfileId,
    visibility: Arc<LayerVisibilityManager>,
    patterns: Arc<HatchPatternGenerator>,
    collaborators: Collaborators,
    config: CascadeConfig,
    phase: Mutex<RunPhase>,
    deferred: Mutex<BTreeMap<LayerId, DeferredLayer>>,
}

impl std::fmt::Debug for ThemeApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThemeApplier")
            .field("profile", &self.profile)
            .field("phase", &self.phase.lock().phase)
            .field("deferred", &self.deferred.lock().len())
            .finish()
    }
}

impl ThemeApplier {
    pub fn new(
        profile: ProfileId,
        visibility: Arc<LayerVisibilityManager>,
        patterns: Arc<HatchPatternGenerator>,
        collaborators: Collaborators,
        config: CascadeConfig,
    ) -> Self {
        Self {
            profile,
            visibility,
            patterns,
            collaborators,
            config,
            phase: Mutex::new(RunPhase::default()),
            deferred: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn profile(&self) -> &ProfileId {
        &self.profile
    }

    /// Phase of the most recently started run.
    pub fn current_phase(&self) -> ApplyPhase {
        self.phase.lock().phase
    }

    /// Layers whose theme entry is waiting for the layer to load.
    pub fn deferred_layers(&self) -> Vec<LayerId> {
        self.deferred.lock().keys().cloned().collect()
    }

    fn begin_run(&self) -> u64 {
        let mut current = self.phase.lock();
        current.run += 1;
        current.phase = ApplyPhase::Idle;
        current.run
    }

    fn enter(&self, run: u64, phase: ApplyPhase) {
        let mut current = self.phase.lock();
        if current.run != run {
            return;
        }
        tracing::trace!(profile = %self.profile, run, ?phase, "theme run phase");
        current.phase = phase;
    }

    /// Applies `theme` to every layer.
    ///
    /// Only a malformed definition is an error. A cancelled run stops at the
    /// next suspension point and returns a report flagged `cancelled`.
    pub async fn apply_theme(
        &self,
        theme: &ThemeDefinition,
        cancel: &CancellationToken,
    ) -> Result<ThemeRunReport, CascadeError> {
        theme.validate()?;
        let run = self.begin_run();
        let mut report = ThemeRunReport::new(theme.id.clone());
        tracing::info!(
            profile = %self.profile,
            theme_id = %theme.id,
            layers = theme.layers.len(),
            "applying theme"
        );

        self.enter(run, ApplyPhase::Resetting);
        self.visibility.reset_all_user_overrides();
        self.deferred.lock().clear();

        self.enter(run, ApplyPhase::HidingAll);
        let registry = &self.collaborators.registry;
        for id in registry.registered_layers() {
            self.visibility.set_visibility(&id, false, VisibilitySource::Theme);
            registry.set_rendered(&id, false);
        }

        self.enter(run, ApplyPhase::ApplyingLayers);
        let mut applied = Vec::new();
        for entry in &theme.layers {
            match self.apply_entry(&theme.id, entry, cancel).await {
                Ok(step) => {
                    if let Some(style) = step.applied {
                        applied.push(style);
                    }
                    report.record(entry.id.clone(), step.outcome);
                }
                Err(Cancelled) => return Ok(self.cancelled(run, report)),
            }
        }
        if cancel.is_cancelled() {
            return Ok(self.cancelled(run, report));
        }

        self.enter(run, ApplyPhase::SyncingUi);
        self.sync_ui(&applied, &mut report);

        self.enter(run, ApplyPhase::Done);
        tracing::info!(
            profile = %self.profile,
            theme_id = %theme.id,
            deferred = report.deferred.len(),
            failed = report.failures().count(),
            "theme applied"
        );
        Ok(report)
    }

    fn cancelled(&self, run: u64, mut report: ThemeRunReport) -> ThemeRunReport {
        tracing::info!(profile = %self.profile, theme_id = %report.theme_id, "theme run superseded");
        self.enter(run, ApplyPhase::Cancelled);
        report.cancelled = true;
        report
    }

    async fn apply_entry(
        &self,
        theme_id: &ThemeId,
        entry: &ThemeLayer,
        cancel: &CancellationToken,
    ) -> Result<LayerStep, Cancelled> {
        let c = &self.collaborators;

        let record = match c.registry.layer(&entry.id) {
            Some(record) => record,
            None => {
                let materialized = c.registry.materialize(&entry.id).await;
                cancel.check()?;
                match materialized {
                    Ok(record) => {
                        tracing::debug!(layer_id = %entry.id, "layer materialized for theme");
                        record
                    }
                    Err(e) => {
                        tracing::warn!(layer_id = %entry.id, theme_id = %theme_id, "layer deferred: {e}");
                        self.deferred.lock().insert(
                            entry.id.clone(),
                            DeferredLayer {
                                theme_id: theme_id.clone(),
                                entry: entry.clone(),
                            },
                        );
                        return Ok(LayerStep::bare(LayerOutcome::Deferred, false));
                    }
                }
            }
        };

        if !entry.visible {
            let overridden = !self
                .visibility
                .set_visibility(&entry.id, false, VisibilitySource::Theme);
            let visible = self.visibility.is_visible(entry.id.as_str());
            c.registry.set_rendered(&entry.id, visible);
            if !visible {
                c.labels.disable_labels(&entry.id);
            }
            c.toggles.refresh_toggle(&entry.id, visible, false);
            let outcome = if overridden {
                tracing::debug!(layer_id = %entry.id, "user override kept over theme visibility");
                LayerOutcome::OverrideKept { style_id: None }
            } else {
                LayerOutcome::Hidden
            };
            return Ok(LayerStep::bare(outcome, visible));
        }

        let overridden = !self
            .visibility
            .set_visibility(&entry.id, true, VisibilitySource::Theme);
        if overridden {
            tracing::debug!(layer_id = %entry.id, "user override kept over theme visibility");
        }
        let visible = self.visibility.is_visible(entry.id.as_str());
        c.registry.set_rendered(&entry.id, visible);

        let requested = entry.style.clone().or_else(|| {
            record
                .current_style_id
                .is_none()
                .then(|| record.config.default_style.clone())
                .flatten()
        });

        let mut step = match requested {
            None => LayerStep::bare(LayerOutcome::Applied { style_id: None }, visible),
            Some(requested) => match self.resolve_style(&record.config, &requested) {
                None => {
                    tracing::warn!(
                        layer_id = %entry.id,
                        style_id = %requested,
                        "style not declared by layer, keeping current style"
                    );
                    LayerStep::bare(LayerOutcome::StyleSkipped { requested }, visible)
                }
                Some(option) => match self.load_and_apply(&record, option, cancel).await {
                    Ok(applied) => LayerStep {
                        outcome: LayerOutcome::Applied {
                            style_id: Some(applied.style_id.clone()),
                        },
                        applied: Some(applied),
                        visible,
                    },
                    Err(StyleFailure::Cancelled) => return Err(Cancelled),
                    Err(StyleFailure::Failed(reason)) => {
                        tracing::warn!(layer_id = %entry.id, style_id = %option.id, "style not applied: {reason}");
                        LayerStep::bare(LayerOutcome::Failed { reason }, visible)
                    }
                },
            },
        };

        if overridden && let LayerOutcome::Applied { style_id } = &mut step.outcome {
            let style_id = style_id.take();
            step.outcome = LayerOutcome::OverrideKept { style_id };
        }

        let labels_enabled = record.config.labels && visible;
        if labels_enabled {
            let style = step
                .applied
                .as_ref()
                .map(|a| &a.style)
                .or(record.current_style.as_ref());
            c.labels.reinit_labels(&entry.id, style);
        }
        c.toggles.refresh_toggle(&entry.id, visible, labels_enabled);
        Ok(step)
    }

    /// Looks `requested` up among the layer's styles, then tries its fallback partner.
    fn resolve_style<'c>(&self, config: &'c LayerConfig, requested: &StyleId) -> Option<&'c StyleOption> {
        if let Some(option) = config.style(requested.as_str()) {
            return Some(option);
        }
        let alternate = self.config.fallback_for(requested)?;
        let option = config.style(alternate.as_str())?;
        tracing::debug!(layer_id = %config.id, requested = %requested, substituted = %alternate, "style fallback");
        Some(option)
    }

    async fn load_and_apply(
        &self,
        record: &LayerRecord,
        option: &StyleOption,
        cancel: &CancellationToken,
    ) -> Result<AppliedStyle, StyleFailure> {
        let layer_id = record.id();
        let doc = self
            .collaborators
            .styles
            .load_style(&self.profile, &record.config, option)
            .await;
        cancel.check()?;
        let doc = doc.map_err(|e| StyleFailure::Failed(e.to_string()))?;

        let mut style = normalize_value(&doc, layer_id)
            .map_err(|e| StyleFailure::Failed(format!("style {}: {e}", option.id)))?;

        self.patterns.unbind_layer(layer_id);
        style.hatch_pattern_id = None;
        if let Some(hatch) = style.active_hatch().cloned() {
            let pattern = self.patterns.ensure_pattern(layer_id, &hatch).await;
            cancel.check()?;
            // An unattached pattern would paint nothing; keep the flat fill.
            if self.patterns.is_attached(&pattern) {
                style.hatch_pattern_id = Some(pattern);
            }
        }

        let registry = &self.collaborators.registry;
        registry
            .apply_style(layer_id, &option.id, &style)
            .map_err(|e| StyleFailure::Failed(e.to_string()))?;
        if let Some(pattern) = &style.hatch_pattern_id {
            for feature in registry.feature_ids(layer_id) {
                self.patterns.bind_fill(layer_id, &feature, pattern);
            }
        }
        tracing::debug!(layer_id = %layer_id, style_id = %option.id, "style applied");

        Ok(AppliedStyle {
            layer: layer_id.clone(),
            style_id: option.id.clone(),
            style,
        })
    }

    fn sync_ui(&self, applied: &[AppliedStyle], report: &mut ThemeRunReport) {
        let c = &self.collaborators;
        let flushed = self.patterns.flush_pending();
        if flushed > 0 {
            tracing::debug!(profile = %self.profile, flushed, "pending hatch patterns attached");
        }
        for a in applied {
            c.style_selector.set_active_style(&a.layer, Some(&a.style_id));
            c.legend.load_legend(&a.layer, &a.style_id, &a.style);
        }

        let registered = c.registry.registered_layers();
        for id in &registered {
            c.legend
                .set_legend_visible(id, self.visibility.is_visible(id.as_str()));
        }

        report.out_of_scale = self.reevaluate_scale();

        if self.config.fit_viewport {
            report.fitted_bounds = self.fit_to_visible(&registered);
        }
    }

    /// Draws every visible layer only when the current map scale is inside
    /// its range. Returns the visible layers drawn hidden.
    ///
    /// Also meant to be called by the host after zooming.
    pub fn reevaluate_scale(&self) -> Vec<LayerId> {
        let c = &self.collaborators;
        let Some(viewport) = c.viewport.current_viewport() else {
            return Vec::new();
        };
        let scale = calculate_map_scale(&viewport);

        let mut out_of_scale = Vec::new();
        for id in c.registry.registered_layers() {
            if !self.visibility.is_visible(id.as_str()) {
                continue;
            }
            let Some(record) = c.registry.layer(&id) else {
                continue;
            };
            let in_range = record.config.visible_at_scale(scale);
            c.registry.set_rendered(&id, in_range);
            if !in_range {
                out_of_scale.push(id);
            }
        }
        tracing::debug!(scale, out_of_scale = out_of_scale.len(), "scale re-evaluated");
        out_of_scale
    }

    fn fit_to_visible(&self, registered: &[LayerId]) -> Option<GeoBounds> {
        let c = &self.collaborators;
        let bounds: Vec<GeoBounds> = registered
            .iter()
            .filter(|id| self.visibility.is_visible(id.as_str()))
            .filter_map(|id| c.registry.layer(id)?.bounds)
            .collect();
        let union = GeoBounds::union_all(bounds.iter())?;
        c.viewport.fit_bounds(&union);
        Some(union)
    }

    /// Re-runs the deferred theme entry of `layer_id`, typically once the
    /// layer has finished loading.
    ///
    /// Returns `None` when nothing was deferred for the layer or the retry was
    /// cancelled; a cancelled retry stays deferred.
    pub async fn retry_deferred(
        &self,
        layer_id: &LayerId,
        cancel: &CancellationToken,
    ) -> Option<LayerOutcome> {
        let pending = self.deferred.lock().remove(layer_id)?;
        tracing::info!(layer_id = %layer_id, theme_id = %pending.theme_id, "retrying deferred layer");

        match self.apply_entry(&pending.theme_id, &pending.entry, cancel).await {
            Ok(step) => {
                let c = &self.collaborators;
                if let Some(a) = &step.applied {
                    c.style_selector.set_active_style(&a.layer, Some(&a.style_id));
                    c.legend.load_legend(&a.layer, &a.style_id, &a.style);
                }
                c.legend.set_legend_visible(layer_id, step.visible);
                if step.visible {
                    self.reevaluate_scale();
                }
                Some(step.outcome)
            }
            Err(Cancelled) => {
                self.deferred.lock().insert(layer_id.clone(), pending);
                None
            }
        }
    }

    /// Retries every deferred entry; returns the outcome per layer retried.
    pub async fn retry_all_deferred(&self, cancel: &CancellationToken) -> Vec<(LayerId, LayerOutcome)> {
        let mut outcomes = Vec::new();
        for id in self.deferred_layers() {
            if let Some(outcome) = self.retry_deferred(&id, cancel).await {
                outcomes.push((id, outcome));
            }
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryLayerRegistry, StaticStyleLoader};
    use layers::InMemorySurface;
    use pretty_assertions::assert_eq;
    use runtime::{NoDelay, RetryPolicy};
    use serde_json::json;

    fn applier(registry: Arc<InMemoryLayerRegistry>, styles: StaticStyleLoader) -> ThemeApplier {
        let patterns = HatchPatternGenerator::with_sleeper(
            Arc::new(InMemorySurface::mounted()),
            RetryPolicy::default(),
            Arc::new(NoDelay),
        );
        ThemeApplier::new(
            ProfileId::new("alps"),
            Arc::new(LayerVisibilityManager::new()),
            Arc::new(patterns),
            Collaborators::new(registry, Arc::new(styles)),
            CascadeConfig::default(),
        )
    }

    #[tokio::test]
    async fn rejects_malformed_theme_before_touching_state() {
        let registry = Arc::new(InMemoryLayerRegistry::new().with_layer(LayerConfig::new("a")));
        let applier = applier(registry, StaticStyleLoader::new());
        applier
            .visibility
            .set_visibility(&LayerId::new("a"), true, VisibilitySource::User);

        let theme = ThemeDefinition::new("", vec![]);
        let err = applier
            .apply_theme(&theme, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CascadeError::MalformedTheme(_)));
        assert!(applier.visibility.user_override_active("a"));
        assert_eq!(applier.current_phase(), ApplyPhase::Idle);
    }

    #[tokio::test]
    async fn fallback_pair_substitutes_undeclared_style() {
        let registry = Arc::new(
            InMemoryLayerRegistry::new().with_layer(LayerConfig::new("roads").with_styles(["defaut"])),
        );
        let styles = StaticStyleLoader::new().with_style("roads", "defaut", json!({"color": "#111111"}));
        let applier = applier(registry.clone(), styles);

        let theme = ThemeDefinition::new("t", vec![ThemeLayer::shown("roads", Some("default"))]);
        let report = applier
            .apply_theme(&theme, &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(
            report.outcome("roads"),
            Some(&LayerOutcome::Applied {
                style_id: Some(StyleId::new("defaut"))
            })
        );
        assert_eq!(registry.style_history("roads"), vec![StyleId::new("defaut")]);
    }

    #[tokio::test]
    async fn default_style_used_when_theme_names_none() {
        let mut config = LayerConfig::new("roads").with_styles(["night"]);
        config.default_style = Some(StyleId::new("night"));
        let registry = Arc::new(InMemoryLayerRegistry::new().with_layer(config));
        let styles = StaticStyleLoader::new().with_style("roads", "night", json!({"color": "#000000"}));
        let applier = applier(registry.clone(), styles);

        let theme = ThemeDefinition::new("t", vec![ThemeLayer::shown("roads", None)]);
        applier
            .apply_theme(&theme, &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(registry.style_history("roads"), vec![StyleId::new("night")]);

        // A second run keeps the style now in place.
        applier
            .apply_theme(&theme, &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(registry.style_history("roads").len(), 1);
    }

    #[tokio::test]
    async fn cancelled_token_stops_the_run() {
        let registry = Arc::new(
            InMemoryLayerRegistry::new().with_available(LayerConfig::new("a")),
        );
        let applier = applier(registry, StaticStyleLoader::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let theme = ThemeDefinition::new("t", vec![ThemeLayer::shown("a", None)]);
        let report = applier.apply_theme(&theme, &cancel).await.expect("run");
        assert!(report.cancelled);
        assert!(report.outcomes.is_empty());
        assert_eq!(applier.current_phase(), ApplyPhase::Cancelled);
    }

    #[test]
    fn superseded_run_leaves_live_phase_alone() {
        let applier = applier(Arc::new(InMemoryLayerRegistry::new()), StaticStyleLoader::new());
        let stale = applier.begin_run();
        let live = applier.begin_run();
        applier.enter(live, ApplyPhase::ApplyingLayers);

        let report = applier.cancelled(stale, ThemeRunReport::new(ThemeId::new("old")));
        assert!(report.cancelled);
        assert_eq!(applier.current_phase(), ApplyPhase::ApplyingLayers);

        applier.enter(stale, ApplyPhase::Done);
        assert_eq!(applier.current_phase(), ApplyPhase::ApplyingLayers);
    }
}
