use serde_json::{json, Value};

use crate::model::PositionRecord;

/// Render records as a GeoJSON `FeatureCollection` of points.
///
/// Only the first record per identity is emitted, matching the position
/// every proximity query uses.
pub fn feature_collection(records: &[PositionRecord]) -> Value {
    let mut seen = std::collections::HashSet::new();
    let features: Vec<Value> = records
    .iter()
    .filter(|r| seen.insert(r.identity.as_str()))
    .map(|r| {
        json!({
            "type": "Feature",
            // GeoJSON wants [longitude, latitude]
            "geometry": { "type": "Point", "coordinates": [r.longitude, r.latitude] },
            "properties": { "identity": r.identity, "recorded_at": r.recorded_at },
        })
    })
    .collect();

    json!({ "type": "FeatureCollection", "features": features })
}
