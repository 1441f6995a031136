//! Procedural hatch fills.
//!
//! A hatch descriptor is turned into an SVG `<pattern>` definition whose id is
//! derived from the descriptor content and the owning layer, so identical
//! descriptors share one definition. Definitions are kept in an append-only
//! pool and attached to the render surface's shared definition pool, retrying
//! while the surface is not mounted yet.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use foundation::LayerId;
use parking_lot::Mutex;
use runtime::{Attempt, RetryPolicy, Sleeper, TokioSleeper};
use serde::{Deserialize, Serialize};

use crate::symbology::{HatchDescriptor, HatchType};

const MIN_TILE_PX: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(String);

impl PatternId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fill reference understood by SVG renderers.
    pub fn fill_ref(&self) -> String {
        format!("url(#{})", self.0)
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl HatchType {
    /// Angle the family is drawn at when no angle is configured.
    pub fn default_angle_deg(self) -> f64 {
        match self {
            HatchType::Diagonal | HatchType::X => 45.0,
            HatchType::Vertical => 90.0,
            HatchType::Horizontal | HatchType::Cross | HatchType::Dot => 0.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HatchType::Diagonal => "diagonal",
            HatchType::Horizontal => "horizontal",
            HatchType::Vertical => "vertical",
            HatchType::Cross => "cross",
            HatchType::X => "x",
            HatchType::Dot => "dot",
        }
    }
}

/// Content-addressed id for `hatch` drawn on `layer_id`.
///
/// Hashes type, effective angle, spacing, stroke color, width and opacity,
/// plus the layer id.
pub fn pattern_id(layer_id: &LayerId, hatch: &HatchDescriptor) -> PatternId {
    let canonical = format!(
        "{}|{}|{}|{}|{}|{}|{}",
        hatch.kind.as_str(),
        num(effective_angle(hatch)),
        num(tile_size(hatch)),
        hatch.stroke.color.trim().to_ascii_lowercase(),
        num(hatch.stroke.width_px),
        num(hatch.stroke.opacity),
        layer_id,
    );
    let hash = blake3::hash(canonical.as_bytes()).to_hex();
    PatternId(format!("hatch-{}", &hash.as_str()[..16]))
}

fn effective_angle(hatch: &HatchDescriptor) -> f64 {
    hatch
        .angle_deg
        .filter(|a| a.is_finite())
        .unwrap_or_else(|| hatch.kind.default_angle_deg())
}

fn tile_size(hatch: &HatchDescriptor) -> f64 {
    if hatch.spacing_px.is_finite() {
        hatch.spacing_px.max(MIN_TILE_PX)
    } else {
        MIN_TILE_PX
    }
}

/// Rounds to three decimals and prints without trailing zeros.
fn num(v: f64) -> String {
    let r = (v * 1000.0).round() / 1000.0;
    if r == 0.0 {
        return "0".to_string();
    }
    format!("{r}")
}

fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("&quot;"),
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Generated tile-fill definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternDefinition {
    pub id: PatternId,
    pub tile_size: f64,
    pub markup: String,
}

/// Builds the SVG `<pattern>` element for `hatch`.
pub fn build_pattern(id: PatternId, hatch: &HatchDescriptor) -> PatternDefinition {
    let s = tile_size(hatch);
    let c = s / 2.0;
    let color = escape_attr(&hatch.stroke.color);
    let width = num(hatch.stroke.width_px.max(0.0));
    let opacity = num(hatch.stroke.opacity.clamp(0.0, 1.0));
    let stroke_attrs =
        format!(r#"fill="none" stroke="{color}" stroke-width="{width}" stroke-opacity="{opacity}" stroke-linecap="square""#);

    let body = match hatch.kind {
        HatchType::Horizontal => {
            format!(r#"<path d="M0,{c} L{s},{c}" {stroke_attrs}/>"#, c = num(c), s = num(s))
        }
        HatchType::Vertical => {
            format!(r#"<path d="M{c},0 L{c},{s}" {stroke_attrs}/>"#, c = num(c), s = num(s))
        }
        HatchType::Diagonal => {
            // Main diagonal plus the two corner stubs that keep lines continuous across tiles.
            let q = s / 4.0;
            format!(
                r#"<path d="M0,{s} L{s},0 M{nq},{q} L{q},{nq} M{tq},{fq} L{fq},{tq}" {stroke_attrs}/>"#,
                s = num(s),
                q = num(q),
                nq = num(-q),
                tq = num(3.0 * q),
                fq = num(5.0 * q),
            )
        }
        HatchType::Cross => format!(
            r#"<path d="M0,{c} L{s},{c} M{c},0 L{c},{s}" {stroke_attrs}/>"#,
            c = num(c),
            s = num(s)
        ),
        HatchType::X => format!(
            r#"<path d="M0,0 L{s},{s} M{s},0 L0,{s}" {stroke_attrs}/>"#,
            s = num(s)
        ),
        HatchType::Dot => {
            let r = (s / 5.0).max(hatch.stroke.width_px / 2.0).max(0.5).min(c);
            format!(
                r#"<circle cx="{c}" cy="{c}" r="{r}" fill="{color}" fill-opacity="{opacity}"/>"#,
                c = num(c),
                r = num(r)
            )
        }
    };

    let angle = effective_angle(hatch);
    let delta = angle - hatch.kind.default_angle_deg();
    let transform = if delta.abs() > 1e-9 {
        format!(r#" patternTransform="rotate({} {} {})""#, num(delta), num(c), num(c))
    } else {
        String::new()
    };

    let markup = format!(
        r#"<pattern id="{id}" patternUnits="userSpaceOnUse" width="{s}" height="{s}"{transform}>{body}</pattern>"#,
        id = id,
        s = num(s),
    );

    PatternDefinition {
        id,
        tile_size: s,
        markup,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    /// The shared definition pool does not exist yet.
    #[error("render surface is not mounted")]
    NotMounted,
    #[error("render surface rejected pattern: {0}")]
    Rejected(String),
}

/// The live render surface's shared definition pool.
pub trait PatternSurface: Send + Sync {
    fn has_pattern(&self, id: &PatternId) -> Result<bool, SurfaceError>;
    fn attach_pattern(&self, definition: &PatternDefinition) -> Result<(), SurfaceError>;
}

/// In-process definition pool, used headless and in tests.
#[derive(Debug, Default)]
pub struct InMemorySurface {
    mounted: parking_lot::RwLock<bool>,
    pool: Mutex<BTreeMap<PatternId, PatternDefinition>>,
}

impl InMemorySurface {
    pub fn mounted() -> Self {
        let s = Self::default();
        s.mount();
        s
    }

    pub fn unmounted() -> Self {
        Self::default()
    }

    pub fn mount(&self) {
        *self.mounted.write() = true;
    }

    pub fn len(&self) -> usize {
        self.pool.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.lock().is_empty()
    }

    pub fn definition(&self, id: &PatternId) -> Option<PatternDefinition> {
        self.pool.lock().get(id).cloned()
    }
}

impl PatternSurface for InMemorySurface {
    fn has_pattern(&self, id: &PatternId) -> Result<bool, SurfaceError> {
        if !*self.mounted.read() {
            return Err(SurfaceError::NotMounted);
        }
        Ok(self.pool.lock().contains_key(id))
    }

    fn attach_pattern(&self, definition: &PatternDefinition) -> Result<(), SurfaceError> {
        if !*self.mounted.read() {
            return Err(SurfaceError::NotMounted);
        }
        self.pool
            .lock()
            .entry(definition.id.clone())
            .or_insert_with(|| definition.clone());
        Ok(())
    }
}

/// What the renderer should do with a feature's fill after a redraw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillReconcile {
    /// Fill already references the bound pattern, or nothing is bound.
    Unchanged,
    /// Fill references some other pattern; left alone.
    Foreign,
    /// Fill was cleared or replaced by a flat value; write this reference back.
    Restore(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct FeatureKey {
    layer_id: LayerId,
    feature_id: String,
}

/// Generates, pools and attaches hatch patterns for one map session.
pub struct HatchPatternGenerator {
    surface: Arc<dyn PatternSurface>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    definitions: Mutex<BTreeMap<PatternId, PatternDefinition>>,
    attached: Mutex<BTreeSet<PatternId>>,
    bindings: Mutex<BTreeMap<FeatureKey, PatternId>>,
}

impl fmt::Debug for HatchPatternGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HatchPatternGenerator")
            .field("retry", &self.retry)
            .field("definitions", &self.definitions.lock().len())
            .field("attached", &self.attached.lock().len())
            .field("bindings", &self.bindings.lock().len())
            .finish()
    }
}

impl HatchPatternGenerator {
    pub fn new(surface: Arc<dyn PatternSurface>, retry: RetryPolicy) -> Self {
        Self::with_sleeper(surface, retry, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(
        surface: Arc<dyn PatternSurface>,
        retry: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            surface,
            retry,
            sleeper,
            definitions: Mutex::new(BTreeMap::new()),
            attached: Mutex::new(BTreeSet::new()),
            bindings: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the pooled definition for `hatch`, generating it on first use.
    pub fn definition(&self, layer_id: &LayerId, hatch: &HatchDescriptor) -> PatternDefinition {
        let id = pattern_id(layer_id, hatch);
        let mut defs = self.definitions.lock();
        if let Some(existing) = defs.get(&id) {
            return existing.clone();
        }
        let def = build_pattern(id.clone(), hatch);
        tracing::debug!(layer_id = %layer_id, pattern_id = %id, kind = hatch.kind.as_str(), "hatch pattern generated");
        defs.insert(id, def.clone());
        def
    }

    /// Ensures a definition for `hatch` exists and is attached to the surface.
    ///
    /// Always returns the pattern id. If the surface stays unmounted past the
    /// retry budget the definition remains pooled (see [`flush_pending`]) and
    /// features keep their flat fill.
    ///
    /// [`flush_pending`]: HatchPatternGenerator::flush_pending
    pub async fn ensure_pattern(&self, layer_id: &LayerId, hatch: &HatchDescriptor) -> PatternId {
        let def = self.definition(layer_id, hatch);
        if self.attached.lock().contains(&def.id) {
            return def.id;
        }

        let surface = self.surface.clone();
        let outcome = self
            .retry
            .run(self.sleeper.as_ref(), |_attempt| {
                let surface = surface.clone();
                let def = &def;
                async move {
                    match surface.has_pattern(&def.id) {
                        Ok(true) => return Ok(()),
                        Ok(false) => {}
                        Err(SurfaceError::NotMounted) => {
                            return Err(Attempt::Retry(SurfaceError::NotMounted));
                        }
                        Err(e) => return Err(Attempt::Abort(e)),
                    }
                    surface.attach_pattern(def).map_err(|e| match e {
                        SurfaceError::NotMounted => Attempt::Retry(e),
                        other => Attempt::Abort(other),
                    })
                }
            })
            .await;

        match outcome {
            Ok(()) => {
                self.attached.lock().insert(def.id.clone());
            }
            Err(err) => {
                tracing::warn!(
                    layer_id = %layer_id,
                    pattern_id = %def.id,
                    "hatch pattern not attached, falling back to flat fill: {err}"
                );
            }
        }
        def.id
    }

    /// Attaches every pooled definition not yet on the surface, without retry.
    ///
    /// Returns the number of definitions attached by this call.
    pub fn flush_pending(&self) -> usize {
        let pending: Vec<PatternDefinition> = {
            let attached = self.attached.lock();
            self.definitions
                .lock()
                .values()
                .filter(|d| !attached.contains(&d.id))
                .cloned()
                .collect()
        };
        let mut count = 0;
        for def in pending {
            match self.surface.attach_pattern(&def) {
                Ok(()) => {
                    self.attached.lock().insert(def.id.clone());
                    count += 1;
                }
                Err(err) => {
                    tracing::debug!(pattern_id = %def.id, "pending hatch pattern still unattached: {err}");
                }
            }
        }
        count
    }

    pub fn is_attached(&self, id: &PatternId) -> bool {
        self.attached.lock().contains(id)
    }

    pub fn definition_count(&self) -> usize {
        self.definitions.lock().len()
    }

    /// Records that `feature_id` on `layer_id` is filled by `pattern`.
    ///
    /// Returns the fill reference the renderer should write.
    pub fn bind_fill(&self, layer_id: &LayerId, feature_id: &str, pattern: &PatternId) -> String {
        self.bindings.lock().insert(
            FeatureKey {
                layer_id: layer_id.clone(),
                feature_id: feature_id.to_string(),
            },
            pattern.clone(),
        );
        pattern.fill_ref()
    }

    /// Drops every fill binding of `layer_id`, e.g. before a new style lands.
    pub fn unbind_layer(&self, layer_id: &LayerId) {
        self.bindings.lock().retain(|k, _| &k.layer_id != layer_id);
    }

    /// Decides whether a redraw clobbered a bound fill.
    ///
    /// Only cleared or flat fills are restored; a fill that already matches,
    /// or one pointing at another pattern, is left untouched so renderer and
    /// cascade never fight over the attribute.
    pub fn reconcile_fill(
        &self,
        layer_id: &LayerId,
        feature_id: &str,
        current_fill: Option<&str>,
    ) -> FillReconcile {
        let key = FeatureKey {
            layer_id: layer_id.clone(),
            feature_id: feature_id.to_string(),
        };
        let Some(bound) = self.bindings.lock().get(&key).cloned() else {
            return FillReconcile::Unchanged;
        };
        let expected = bound.fill_ref();
        match current_fill.map(str::trim) {
            Some(cur) if cur == expected => FillReconcile::Unchanged,
            Some(cur) if cur.starts_with("url(") => FillReconcile::Foreign,
            _ => FillReconcile::Restore(expected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbology::{HatchStroke, RenderMode};
    use runtime::NoDelay;
    use std::time::Duration;

    fn hatch(kind: HatchType) -> HatchDescriptor {
        HatchDescriptor {
            enabled: true,
            kind,
            angle_deg: None,
            spacing_px: 8.0,
            stroke: HatchStroke {
                color: "#000".to_string(),
                opacity: 1.0,
                width_px: 1.0,
            },
            render_mode: RenderMode::Normal,
        }
    }

    fn generator(surface: Arc<InMemorySurface>, attempts: u32) -> HatchPatternGenerator {
        HatchPatternGenerator::with_sleeper(
            surface,
            RetryPolicy::new(attempts, Duration::from_millis(1)),
            Arc::new(NoDelay),
        )
    }

    #[test]
    fn pattern_id_is_content_addressed() {
        let layer = LayerId::new("parks");
        let a = pattern_id(&layer, &hatch(HatchType::Dot));
        let b = pattern_id(&layer, &hatch(HatchType::Dot));
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("hatch-"));

        let other_layer = pattern_id(&LayerId::new("lakes"), &hatch(HatchType::Dot));
        assert_ne!(a, other_layer);

        let mut wider = hatch(HatchType::Dot);
        wider.spacing_px = 12.0;
        assert_ne!(a, pattern_id(&layer, &wider));
    }

    #[test]
    fn default_angle_and_explicit_default_share_an_id() {
        let layer = LayerId::new("l");
        let implicit = hatch(HatchType::Diagonal);
        let mut explicit = hatch(HatchType::Diagonal);
        explicit.angle_deg = Some(45.0);
        assert_eq!(pattern_id(&layer, &implicit), pattern_id(&layer, &explicit));
    }

    #[test]
    fn rotation_only_when_angle_differs_from_family_default() {
        let layer = LayerId::new("l");
        let plain = hatch(HatchType::Horizontal);
        let def = build_pattern(pattern_id(&layer, &plain), &plain);
        assert!(!def.markup.contains("patternTransform"));

        let mut tilted = hatch(HatchType::Horizontal);
        tilted.angle_deg = Some(30.0);
        let def = build_pattern(pattern_id(&layer, &tilted), &tilted);
        assert!(def.markup.contains(r#"patternTransform="rotate(30 4 4)""#), "{}", def.markup);
    }

    #[test]
    fn families_draw_expected_primitives() {
        let layer = LayerId::new("l");
        for kind in [
            HatchType::Diagonal,
            HatchType::Horizontal,
            HatchType::Vertical,
            HatchType::Cross,
            HatchType::X,
        ] {
            let h = hatch(kind);
            let def = build_pattern(pattern_id(&layer, &h), &h);
            assert!(def.markup.contains("<path"), "{kind:?}: {}", def.markup);
            assert!(def.markup.contains(r#"width="8" height="8""#));
        }
        let dot = hatch(HatchType::Dot);
        let def = build_pattern(pattern_id(&layer, &dot), &dot);
        assert!(def.markup.contains(r#"<circle cx="4" cy="4" r="1.6""#), "{}", def.markup);
    }

    #[test]
    fn colors_are_attribute_escaped() {
        let mut h = hatch(HatchType::Cross);
        h.stroke.color = "red\"/><script>".to_string();
        let def = build_pattern(pattern_id(&LayerId::new("l"), &h), &h);
        assert!(!def.markup.contains("<script>"));
    }

    #[tokio::test]
    async fn ensure_pattern_is_idempotent() {
        let surface = Arc::new(InMemorySurface::mounted());
        let g = generator(surface.clone(), 3);
        let layer = LayerId::new("parks");
        let h = hatch(HatchType::Cross);

        let a = g.ensure_pattern(&layer, &h).await;
        let b = g.ensure_pattern(&layer, &h).await;
        assert_eq!(a, b);
        assert_eq!(g.definition_count(), 1);
        assert_eq!(surface.len(), 1);
        assert!(g.is_attached(&a));
    }

    #[tokio::test]
    async fn unmounted_surface_exhausts_retries_then_flushes_later() {
        let surface = Arc::new(InMemorySurface::unmounted());
        let g = generator(surface.clone(), 3);
        let layer = LayerId::new("parks");

        let id = g.ensure_pattern(&layer, &hatch(HatchType::X)).await;
        assert!(!g.is_attached(&id));
        assert!(surface.is_empty());

        surface.mount();
        assert_eq!(g.flush_pending(), 1);
        assert!(g.is_attached(&id));
        assert!(surface.definition(&id).is_some());
        assert_eq!(g.flush_pending(), 0);
    }

    struct MountsAfter {
        inner: InMemorySurface,
        calls: Mutex<u32>,
        mount_on_call: u32,
    }

    impl PatternSurface for MountsAfter {
        fn has_pattern(&self, id: &PatternId) -> Result<bool, SurfaceError> {
            let mut calls = self.calls.lock();
            *calls += 1;
            if *calls >= self.mount_on_call {
                self.inner.mount();
            }
            self.inner.has_pattern(id)
        }

        fn attach_pattern(&self, definition: &PatternDefinition) -> Result<(), SurfaceError> {
            self.inner.attach_pattern(definition)
        }
    }

    #[tokio::test]
    async fn attach_retries_until_surface_mounts() {
        let surface = Arc::new(MountsAfter {
            inner: InMemorySurface::unmounted(),
            calls: Mutex::new(0),
            mount_on_call: 3,
        });
        let g = HatchPatternGenerator::with_sleeper(
            surface.clone(),
            RetryPolicy::new(5, Duration::from_millis(1)),
            Arc::new(NoDelay),
        );
        let id = g.ensure_pattern(&LayerId::new("l"), &hatch(HatchType::Vertical)).await;
        assert!(g.is_attached(&id));
        assert_eq!(*surface.calls.lock(), 3);
    }

    #[test]
    fn reconcile_restores_only_cleared_or_flat_fills() {
        let g = generator(Arc::new(InMemorySurface::mounted()), 1);
        let layer = LayerId::new("parks");
        let id = pattern_id(&layer, &hatch(HatchType::Dot));
        let fill = g.bind_fill(&layer, "f1", &id);

        assert_eq!(g.reconcile_fill(&layer, "f1", Some(&fill)), FillReconcile::Unchanged);
        assert_eq!(g.reconcile_fill(&layer, "f1", None), FillReconcile::Restore(fill.clone()));
        assert_eq!(
            g.reconcile_fill(&layer, "f1", Some("#3388ff")),
            FillReconcile::Restore(fill.clone())
        );
        assert_eq!(
            g.reconcile_fill(&layer, "f1", Some("url(#someone-else)")),
            FillReconcile::Foreign
        );
        assert_eq!(g.reconcile_fill(&layer, "unbound", None), FillReconcile::Unchanged);

        g.unbind_layer(&layer);
        assert_eq!(g.reconcile_fill(&layer, "f1", None), FillReconcile::Unchanged);
    }
}
