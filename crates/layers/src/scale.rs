//! Zoom to map-scale conversion and scale-window tests.
//!
//! Scales are denominators: `5_000_000.0` reads as "1:5,000,000". Larger
//! numbers are more zoomed out.

/// WGS84 semi-major axis (meters).
pub const WGS84_A: f64 = 6_378_137.0;
/// Web Mercator tile edge in CSS pixels.
pub const TILE_SIZE_PX: f64 = 256.0;
/// CSS reference pixel density.
pub const DEFAULT_DPI: f64 = 96.0;

const METERS_PER_INCH: f64 = 0.0254;
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

/// Camera state needed to derive a map scale.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Viewport {
    pub zoom: f64,
    pub center_lat: f64,
    pub dpi: f64,
}

impl Viewport {
    pub fn new(zoom: f64, center_lat: f64) -> Self {
        Self {
            zoom,
            center_lat,
            dpi: DEFAULT_DPI,
        }
    }

    pub fn with_dpi(mut self, dpi: f64) -> Self {
        self.dpi = dpi;
        self
    }
}

/// Web Mercator ground resolution at `lat_deg` for `zoom`, in meters per pixel.
pub fn ground_resolution_m_per_px(zoom: f64, lat_deg: f64) -> f64 {
    let lat = lat_deg.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT).to_radians();
    let circumference = 2.0 * std::f64::consts::PI * WGS84_A;
    circumference * lat.cos() / (TILE_SIZE_PX * 2f64.powf(zoom))
}

/// Scale denominator for the viewport. Strictly decreasing in zoom.
pub fn calculate_map_scale(viewport: &Viewport) -> f64 {
    let dpi = if viewport.dpi.is_finite() && viewport.dpi > 0.0 {
        viewport.dpi
    } else {
        DEFAULT_DPI
    };
    ground_resolution_m_per_px(viewport.zoom, viewport.center_lat) * dpi / METERS_PER_INCH
}

/// Whether `current` lies inside the window `[max_scale, min_scale]`.
///
/// `min_scale` is the least detailed (largest) denominator and `max_scale`
/// the most detailed (smallest). A missing bound leaves that side open.
pub fn is_scale_in_range(current: f64, min_scale: Option<f64>, max_scale: Option<f64>) -> bool {
    if let Some(min) = min_scale
        && current > min
    {
        return false;
    }
    if let Some(max) = max_scale
        && current < max
    {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::{Viewport, calculate_map_scale, is_scale_in_range};

    #[test]
    fn scale_decreases_with_zoom() {
        let mut prev = f64::INFINITY;
        for z in 0..20 {
            let s = calculate_map_scale(&Viewport::new(z as f64, 46.0));
            assert!(s < prev, "zoom {z} produced {s} >= {prev}");
            prev = s;
        }
    }

    #[test]
    fn zoom_zero_at_equator_is_roughly_one_to_591_million() {
        let s = calculate_map_scale(&Viewport::new(0.0, 0.0));
        assert!((s - 591_657_527.6).abs() / s < 1e-3, "got {s}");
    }

    #[test]
    fn invalid_dpi_falls_back_to_default() {
        let a = calculate_map_scale(&Viewport::new(5.0, 10.0));
        let b = calculate_map_scale(&Viewport::new(5.0, 10.0).with_dpi(0.0));
        assert_eq!(a, b);
    }

    #[test]
    fn range_checks_with_both_bounds() {
        assert!(is_scale_in_range(5_000_000.0, Some(15_000_000.0), Some(1_000.0)));
        assert!(!is_scale_in_range(20_000_000.0, Some(15_000_000.0), Some(1_000.0)));
        assert!(!is_scale_in_range(500.0, Some(15_000_000.0), Some(1_000.0)));
        assert!(is_scale_in_range(1_000.0, Some(15_000_000.0), Some(1_000.0)));
        assert!(is_scale_in_range(15_000_000.0, Some(15_000_000.0), Some(1_000.0)));
    }

    #[test]
    fn range_checks_with_open_bounds() {
        assert!(is_scale_in_range(1e12, None, Some(1_000.0)));
        assert!(!is_scale_in_range(999.0, None, Some(1_000.0)));
        assert!(is_scale_in_range(1.0, Some(50_000.0), None));
        assert!(!is_scale_in_range(50_001.0, Some(50_000.0), None));
        for s in [0.0, 1.0, 1e6, 1e12] {
            assert!(is_scale_in_range(s, None, None));
        }
    }
}
