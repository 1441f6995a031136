use foundation::StyleId;
use runtime::RetryPolicy;

/// Tuning for theme application within one map session.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeConfig {
    /// Fit the viewport to the visible layers once a run completes.
    pub fit_viewport: bool,
    /// Two style ids treated as interchangeable when one is not declared by a layer.
    pub style_fallback_pair: Option<(StyleId, StyleId)>,
    pub hatch_retry: RetryPolicy,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            fit_viewport: true,
            style_fallback_pair: Some((StyleId::new("default"), StyleId::new("defaut"))),
            hatch_retry: RetryPolicy::default(),
        }
    }
}

impl CascadeConfig {
    /// The partner of `requested` under the fallback pair, if any.
    pub fn fallback_for(&self, requested: &StyleId) -> Option<&StyleId> {
        let (a, b) = self.style_fallback_pair.as_ref()?;
        if requested == a {
            Some(b)
        } else if requested == b {
            Some(a)
        } else {
            None
        }
    }
}
