//! Minimal GeoJSON inspection: extent, feature count and feature ids.

use foundation::GeoBounds;
use serde_json::Value;

/// Extent of every position in `doc`. A top-level `bbox` wins when present.
pub fn geojson_bounds(doc: &Value) -> Option<GeoBounds> {
    if let Some(bbox) = doc.get("bbox").and_then(bbox_from)
        && bbox.is_valid()
    {
        return Some(bbox);
    }
    let mut acc: Option<GeoBounds> = None;
    collect(doc, &mut acc);
    acc
}

fn bbox_from(value: &Value) -> Option<GeoBounds> {
    let nums: Vec<f64> = value.as_array()?.iter().filter_map(Value::as_f64).collect();
    match nums.as_slice() {
        [min_lon, min_lat, max_lon, max_lat] => Some(GeoBounds::new(*min_lon, *min_lat, *max_lon, *max_lat)),
        // 3D bbox: [minx, miny, minz, maxx, maxy, maxz]
        [min_lon, min_lat, _, max_lon, max_lat, _] => {
            Some(GeoBounds::new(*min_lon, *min_lat, *max_lon, *max_lat))
        }
        _ => None,
    }
}

fn collect(value: &Value, acc: &mut Option<GeoBounds>) {
    match value {
        Value::Object(map) => {
            if let Some(coords) = map.get("coordinates") {
                positions(coords, acc);
            }
            for key in ["features", "geometry", "geometries"] {
                if let Some(child) = map.get(key) {
                    collect(child, acc);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect(v, acc)),
        _ => {}
    }
}

fn positions(value: &Value, acc: &mut Option<GeoBounds>) {
    let Value::Array(items) = value else {
        return;
    };
    if let [Value::Number(lon), Value::Number(lat), ..] = items.as_slice()
        && let (Some(lon), Some(lat)) = (lon.as_f64(), lat.as_f64())
    {
        let point = GeoBounds::point(lon, lat);
        *acc = Some(acc.map_or(point, |b| b.union(&point)));
        return;
    }
    items.iter().for_each(|v| positions(v, acc));
}

/// Features in a collection, 1 for a lone feature or geometry, else 0.
pub fn feature_count(doc: &Value) -> usize {
    match doc.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => doc
            .get("features")
            .and_then(Value::as_array)
            .map_or(0, Vec::len),
        Some(_) => 1,
        None => 0,
    }
}

/// Handle of each feature: its `id` member when present, else its index.
pub fn feature_ids(doc: &Value) -> Vec<String> {
    let handle = |index: usize, feature: &Value| match feature.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => index.to_string(),
    };
    match doc.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => doc
            .get("features")
            .and_then(Value::as_array)
            .map(|features| features.iter().enumerate().map(|(i, f)| handle(i, f)).collect())
            .unwrap_or_default(),
        Some(_) => vec![handle(0, doc)],
        None => Vec::new(),
    }
}
