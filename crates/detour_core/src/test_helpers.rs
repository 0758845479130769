//! Test helpers for common fixture setup and utilities.
//!
//! This module provides shared test fixtures to reduce duplication across
//! test files: a straight east-west route shape near 44.39°N and latitudes
//! that land in the dead band and firmly off-route.

use crate::model::{GeoPoint, Shape, ShapePoint, StaticData, TripShape, VehicleFix};

/// Route used across test files for consistency.
pub const TEST_ROUTE: &str = "route-400";

/// Latitude of the straight test shapes.
pub const SHAPE_LAT: f64 = 44.39;
/// ~55 m north of the shape: inside the 40-75 m dead band.
pub const DEAD_BAND_LAT: f64 = 44.3905;
/// ~555 m north of the shape: firmly off-route.
pub const OFF_ROUTE_LAT: f64 = 44.395;

/// A straight east-west shape at [`SHAPE_LAT`] through the given longitudes.
pub fn straight_shape(shape_id: &str, lons: &[f64]) -> Shape {
    Shape::new(
        shape_id,
        lons.iter()
            .enumerate()
            .map(|(i, &lon)| ShapePoint { lat: SHAPE_LAT, lon, sequence: i as u32 })
            .collect(),
    )
}

/// The three-vertex shape: too short for a detour zone to ever form.
pub fn three_point_shape() -> Shape {
    straight_shape("shape-3", &[-79.70, -79.69, -79.68])
}

/// A five-vertex shape: long enough that spread evidence produces a zone.
pub fn five_point_shape() -> Shape {
    straight_shape("shape-5", &[-79.70, -79.69, -79.68, -79.67, -79.66])
}

/// Static dataset with the given shapes all mapped to `route_id`.
pub fn static_data_with(shapes: Vec<Shape>, route_id: &str) -> StaticData {
    let mut data = StaticData::default();
    data.route_shapes.insert(
        route_id.to_string(),
        shapes.iter().map(|s| s.shape_id.clone()).collect(),
    );
    for shape in shapes {
        data.shapes.insert(shape.shape_id.clone(), shape);
    }
    data
}

/// Add a trip -> shape assignment to a dataset.
pub fn assign_trip(data: &mut StaticData, trip_id: &str, route_id: &str, shape_id: &str) {
    data.trip_shapes.insert(
        trip_id.to_string(),
        TripShape { route_id: route_id.to_string(), shape_id: shape_id.to_string() },
    );
}

/// A well-formed fix for `vehicle` on `route` at the given position.
pub fn fix(vehicle: &str, route: &str, lat: f64, lon: f64, now_ms: i64) -> VehicleFix {
    VehicleFix {
        vehicle_id: vehicle.to_string(),
        route_id: Some(route.to_string()),
        trip_id: None,
        coordinate: Some(GeoPoint { lat, lon }),
        timestamp_sec: now_ms / 1000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::point_to_polyline_m;
    use crate::model::GeoPoint;

    #[test]
    fn dead_band_latitude_is_between_thresholds() {
        let shape = three_point_shape();
        let p = GeoPoint { lat: DEAD_BAND_LAT, lon: -79.69 };
        let d = point_to_polyline_m(&p, &shape.points);
        assert!(d > 40.0 && d <= 75.0, "dead band distance was {d}");
    }

    #[test]
    fn off_route_latitude_is_past_threshold() {
        let shape = three_point_shape();
        let p = GeoPoint { lat: OFF_ROUTE_LAT, lon: -79.69 };
        let d = point_to_polyline_m(&p, &shape.points);
        assert!(d > 75.0, "off-route distance was {d}");
    }
}
