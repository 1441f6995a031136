//! Headless driver for profile directories: opens a map session over a
//! profile, applies themes and reports the resulting layer state.

use std::collections::BTreeSet;
use std::env;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use cascade::{CascadeConfig, Collaborators, LayerOutcome, LayerRegistry, MapSession, ThemeRunReport, ViewportController};
use catalog::{InMemoryPayloadStore, ThemeCache, ThemeLoader};
use formats::{ProfileDirectory, ProfileLayerRegistry};
use foundation::{GeoBounds, LayerId, ProfileId};
use layers::{InMemorySurface, Viewport};

pub const PROFILE_ROOT_ENV: &str = "ATLAS_PROFILE_ROOT";
pub const DEFAULT_PROFILE_ROOT: &str = "profiles";

/// `--root`, else `$ATLAS_PROFILE_ROOT`, else `./profiles`.
pub fn resolve_root(arg: Option<PathBuf>) -> PathBuf {
    arg.unwrap_or_else(|| {
        env::var(PROFILE_ROOT_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_PROFILE_ROOT))
    })
}

/// A viewport that never moves; fits are only logged.
#[derive(Debug, Default)]
pub struct FixedViewport(pub Option<Viewport>);

impl ViewportController for FixedViewport {
    fn current_viewport(&self) -> Option<Viewport> {
        self.0
    }

    fn fit_bounds(&self, bounds: &GeoBounds) {
        tracing::info!(
            min_lon = bounds.min_lon,
            min_lat = bounds.min_lat,
            max_lon = bounds.max_lon,
            max_lat = bounds.max_lat,
            "viewport fit requested"
        );
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub viewport: Option<Viewport>,
    pub fit_viewport: bool,
}

pub struct Workspace {
    pub session: MapSession,
    pub registry: Arc<ProfileLayerRegistry>,
}

pub async fn open_session(root: &Path, profile: &ProfileId, options: SessionOptions) -> anyhow::Result<Workspace> {
    let dir = Arc::new(ProfileDirectory::new(root));
    let package = dir
        .open(profile)
        .with_context(|| format!("opening profile {profile} under {}", root.display()))?;

    let cache = Arc::new(ThemeCache::new(Some(Arc::new(InMemoryPayloadStore::new()))));
    let registry = Arc::new(ProfileLayerRegistry::new(package, cache.clone()));
    for (layer, err) in registry.preload().await {
        tracing::warn!(layer_id = %layer, "layer not preloaded: {err}");
    }

    let collaborators = Collaborators::new(registry.clone(), dir.clone())
        .with_viewport(Arc::new(FixedViewport(options.viewport)));
    let config = CascadeConfig {
        fit_viewport: options.fit_viewport,
        ..CascadeConfig::default()
    };
    let session = MapSession::builder(profile.clone(), dir, collaborators, Arc::new(InMemorySurface::mounted()))
        .config(config)
        .cache(cache)
        .build();

    Ok(Workspace { session, registry })
}

fn outcome_label(outcome: Option<&LayerOutcome>) -> String {
    match outcome {
        None => "-".to_string(),
        Some(LayerOutcome::Applied { .. }) => "applied".to_string(),
        Some(LayerOutcome::Hidden) => "hidden".to_string(),
        Some(LayerOutcome::OverrideKept { .. }) => "user override kept".to_string(),
        Some(LayerOutcome::StyleSkipped { requested }) => format!("style {requested} skipped"),
        Some(LayerOutcome::Deferred) => "deferred".to_string(),
        Some(LayerOutcome::Failed { reason }) => format!("failed: {reason}"),
    }
}

/// Plain-text table of every layer touched by the session or the run.
pub fn visibility_table(workspace: &Workspace, report: &ThemeRunReport) -> String {
    let visibility = workspace.session.visibility();
    let mut ids: BTreeSet<LayerId> = visibility.tracked_layers().into_iter().collect();
    ids.extend(report.outcomes.iter().map(|(id, _)| id.clone()));

    let mut out = String::new();
    let _ = writeln!(out, "theme: {}", report.theme_id);
    let _ = writeln!(out, "{:<20} {:<8} {:<7} {:<12} outcome", "layer", "visible", "source", "style");
    for id in &ids {
        let state = visibility.layer_state(id.as_str());
        let (visible, source) = match &state {
            Some(s) => (s.current.to_string(), format!("{:?}", s.source).to_lowercase()),
            None => ("-".to_string(), "-".to_string()),
        };
        let style = workspace
            .registry
            .layer(id)
            .and_then(|r| r.current_style_id)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<20} {:<8} {:<7} {:<12} {}",
            id.as_str(),
            visible,
            source,
            style,
            outcome_label(report.outcome(id.as_str()))
        );
    }
    if !report.out_of_scale.is_empty() {
        let names: Vec<&str> = report.out_of_scale.iter().map(LayerId::as_str).collect();
        let _ = writeln!(out, "out of scale: {}", names.join(", "));
    }
    if let Some(b) = report.fitted_bounds {
        let _ = writeln!(
            out,
            "fitted bounds: {:.4},{:.4},{:.4},{:.4}",
            b.min_lon, b.min_lat, b.max_lon, b.max_lat
        );
    }
    out
}

/// Cross-checks a profile's catalogue against its layer manifest and style
/// files. Returns one line per problem found.
pub async fn validate_profile(root: &Path, profile: &ProfileId) -> anyhow::Result<Vec<String>> {
    let dir = Arc::new(ProfileDirectory::new(root));
    let loader = ThemeLoader::new(dir.clone());
    let catalogue = loader
        .load(profile)
        .await
        .with_context(|| format!("loading theme catalogue of {profile}"))?;
    let package = dir
        .open(profile)
        .with_context(|| format!("opening layer manifest of {profile}"))?;
    let config = CascadeConfig::default();

    let mut problems = Vec::new();
    for theme in &catalogue.themes {
        if let Err(e) = theme.validate() {
            problems.push(format!("theme {}: {e}", theme.id));
            continue;
        }
        for layer in &theme.layers {
            let Some(entry) = package.manifest().entry(layer.id.as_str()) else {
                problems.push(format!("theme {}: layer {} is not declared", theme.id, layer.id));
                continue;
            };
            let Some(requested) = &layer.style else {
                continue;
            };
            let option = entry.config.style(requested.as_str()).or_else(|| {
                config
                    .fallback_for(requested)
                    .and_then(|alt| entry.config.style(alt.as_str()))
            });
            match option {
                None => problems.push(format!(
                    "theme {}: layer {} does not declare style {requested}",
                    theme.id, layer.id
                )),
                Some(option) => {
                    let path = dir.style_path(profile, &entry.config, option);
                    if !path.is_file() {
                        problems.push(format!(
                            "theme {}: style file {} is missing",
                            theme.id,
                            path.display()
                        ));
                    }
                }
            }
        }
    }
    Ok(problems)
}
