//! Semantic data model shared across the engine.
//!
//! These are the types produced by the external GTFS loader and vehicle
//! fetcher collaborators: route geometries, shape mappings, and per-vehicle
//! GPS fixes. The engine treats all of them as read-only per tick.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// One raw shape vertex as published by the agency; `sequence` orders the
/// vertices along the service path.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapePoint {
    pub lat: f64,
    pub lon: f64,
    pub sequence: u32,
}

/// A single polyline variant of a route, with vertices in service order.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub shape_id: String,
    pub points: Vec<GeoPoint>,
}

impl Shape {
    /// Build a shape from raw vertices, ordering them by `sequence`.
    pub fn new(shape_id: impl Into<String>, mut raw: Vec<ShapePoint>) -> Self {
        raw.sort_by_key(|p| p.sequence);
        Self {
            shape_id: shape_id.into(),
            points: raw
                .into_iter()
                .map(|p| GeoPoint { lat: p.lat, lon: p.lon })
                .collect(),
        }
    }
}

/// Shape assignment for a known trip.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripShape {
    pub route_id: String,
    pub shape_id: String,
}

/// The static GTFS dataset the loader collaborator supplies each tick.
#[derive(Debug, Clone, Default)]
pub struct StaticData {
    pub shapes: HashMap<String, Shape>,
    pub route_shapes: HashMap<String, HashSet<String>>,
    pub trip_shapes: HashMap<String, TripShape>,
    /// When the loader last refreshed the dataset (epoch ms).
    pub last_refresh_ms: i64,
}

impl StaticData {
    /// Resolve the candidate shapes for a fix: the trip's assigned shape when
    /// the trip is known, otherwise every shape variant of the route. Shapes
    /// with no vertices are dropped; an empty result means "skip this fix".
    pub fn candidate_shapes(&self, route_id: &str, trip_id: Option<&str>) -> Vec<&Shape> {
        if let Some(trip_id) = trip_id {
            if let Some(assignment) = self.trip_shapes.get(trip_id) {
                return self
                    .shapes
                    .get(&assignment.shape_id)
                    .filter(|s| !s.points.is_empty())
                    .into_iter()
                    .collect();
            }
        }
        match self.route_shapes.get(route_id) {
            Some(ids) => {
                let mut shapes: Vec<&Shape> = ids
                    .iter()
                    .filter_map(|id| self.shapes.get(id))
                    .filter(|s| !s.points.is_empty())
                    .collect();
                shapes.sort_by(|a, b| a.shape_id.cmp(&b.shape_id));
                shapes
            }
            None => Vec::new(),
        }
    }

    /// All non-empty shape variants published for a route, in stable order.
    pub fn route_shape_variants(&self, route_id: &str) -> Vec<&Shape> {
        self.candidate_shapes(route_id, None)
    }
}

/// One GPS fix from the realtime vehicle feed.
///
/// `route_id` and `coordinate` may be absent on malformed feed entries; the
/// detector silently skips those.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleFix {
    pub vehicle_id: String,
    pub route_id: Option<String>,
    pub trip_id: Option<String>,
    pub coordinate: Option<GeoPoint>,
    /// Wall-clock fix time in seconds.
    pub timestamp_sec: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_orders_points_by_sequence() {
        let shape = Shape::new(
            "s1",
            vec![
                ShapePoint { lat: 44.39, lon: -79.68, sequence: 3 },
                ShapePoint { lat: 44.39, lon: -79.70, sequence: 1 },
                ShapePoint { lat: 44.39, lon: -79.69, sequence: 2 },
            ],
        );
        let lons: Vec<f64> = shape.points.iter().map(|p| p.lon).collect();
        assert_eq!(lons, vec![-79.70, -79.69, -79.68]);
    }

    #[test]
    fn candidate_shapes_prefers_trip_assignment() {
        let mut data = StaticData::default();
        data.shapes.insert(
            "a".into(),
            Shape::new("a", vec![ShapePoint { lat: 0.0, lon: 0.0, sequence: 0 }]),
        );
        data.shapes.insert(
            "b".into(),
            Shape::new("b", vec![ShapePoint { lat: 1.0, lon: 1.0, sequence: 0 }]),
        );
        data.route_shapes
            .insert("r1".into(), ["a".to_string(), "b".to_string()].into());
        data.trip_shapes.insert(
            "t1".into(),
            TripShape { route_id: "r1".into(), shape_id: "b".into() },
        );

        let with_trip = data.candidate_shapes("r1", Some("t1"));
        assert_eq!(with_trip.len(), 1);
        assert_eq!(with_trip[0].shape_id, "b");

        let without_trip = data.candidate_shapes("r1", None);
        assert_eq!(without_trip.len(), 2);
    }

    #[test]
    fn candidate_shapes_skips_unknown_route_and_empty_shapes() {
        let mut data = StaticData::default();
        data.shapes.insert("empty".into(), Shape::new("empty", vec![]));
        data.route_shapes
            .insert("r1".into(), ["empty".to_string()].into());

        assert!(data.candidate_shapes("r1", None).is_empty());
        assert!(data.candidate_shapes("nope", None).is_empty());
        // Unknown trip falls back to the route mapping.
        assert!(data.candidate_shapes("nope", Some("t9")).is_empty());
    }
}
