//! Geometry primitives: haversine distance and longitude-scaled projection.
//!
//! All distances are in meters. Segment projection happens in the
//! equirectangular plane with longitudes scaled by `cos(mid_lat)`, which keeps
//! 1° of longitude and 1° of latitude comparable at the operating latitude;
//! the reported distance is then the haversine from the query point to the
//! clamped projection. No antimeridian handling: the agency operates within a
//! single continent-sized region.

use crate::model::GeoPoint;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two points, in meters.
pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lon.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lon.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Project `p` onto the segment `ab` and return the clamped projection point.
fn project_onto_segment(p: &GeoPoint, a: &GeoPoint, b: &GeoPoint) -> GeoPoint {
    let mid_lat = ((a.lat + b.lat) * 0.5).to_radians();
    let lon_scale = mid_lat.cos();

    let ax = a.lon * lon_scale;
    let ay = a.lat;
    let bx = b.lon * lon_scale;
    let by = b.lat;
    let px = p.lon * lon_scale;
    let py = p.lat;

    let dx = bx - ax;
    let dy = by - ay;
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return *a;
    }

    let t = (((px - ax) * dx + (py - ay) * dy) / len2).clamp(0.0, 1.0);
    GeoPoint {
        lat: a.lat + t * (b.lat - a.lat),
        lon: a.lon + t * (b.lon - a.lon),
    }
}

/// Distance in meters from `p` to the segment `ab`.
pub fn point_to_segment_m(p: &GeoPoint, a: &GeoPoint, b: &GeoPoint) -> f64 {
    haversine_m(p, &project_onto_segment(p, a, b))
}

/// Minimum distance in meters from `p` to a polyline.
///
/// An empty polyline is infinitely far away; a single-point polyline is the
/// haversine distance to that point.
pub fn point_to_polyline_m(p: &GeoPoint, polyline: &[GeoPoint]) -> f64 {
    match polyline {
        [] => f64::INFINITY,
        [only] => haversine_m(p, only),
        _ => polyline
            .windows(2)
            .map(|pair| point_to_segment_m(p, &pair[0], &pair[1]))
            .fold(f64::INFINITY, f64::min),
    }
}

/// The closest point on a polyline to a query coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeProjection {
    /// Index of the segment's *start* vertex.
    pub segment_index: usize,
    pub projected: GeoPoint,
    pub distance_m: f64,
}

/// Find the closest point on `polyline` to `p`, with the segment it lies on.
pub fn closest_shape_point(p: &GeoPoint, polyline: &[GeoPoint]) -> Option<ShapeProjection> {
    match polyline {
        [] => None,
        [only] => Some(ShapeProjection {
            segment_index: 0,
            projected: *only,
            distance_m: haversine_m(p, only),
        }),
        _ => {
            let mut best: Option<ShapeProjection> = None;
            for (index, pair) in polyline.windows(2).enumerate() {
                let projected = project_onto_segment(p, &pair[0], &pair[1]);
                let distance_m = haversine_m(p, &projected);
                if best.as_ref().map_or(true, |b| distance_m < b.distance_m) {
                    best = Some(ShapeProjection {
                        segment_index: index,
                        projected,
                        distance_m,
                    });
                }
            }
            best
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint { lat, lon }
    }

    #[test]
    fn haversine_matches_known_distance() {
        // One degree of latitude is ~111.2 km on the reference sphere.
        let d = haversine_m(&pt(44.0, -79.0), &pt(45.0, -79.0));
        assert!((d - 111_195.0).abs() < 100.0, "got {d}");
    }

    #[test]
    fn haversine_is_zero_for_identical_points() {
        assert_eq!(haversine_m(&pt(44.39, -79.70), &pt(44.39, -79.70)), 0.0);
    }

    #[test]
    fn segment_distance_clamps_to_endpoints() {
        let a = pt(44.39, -79.70);
        let b = pt(44.39, -79.69);
        // Query point west of `a`: projection clamps to `a`.
        let p = pt(44.39, -79.72);
        let expected = haversine_m(&p, &a);
        assert!((point_to_segment_m(&p, &a, &b) - expected).abs() < 1e-6);
    }

    #[test]
    fn segment_distance_uses_perpendicular_interior() {
        let a = pt(44.39, -79.70);
        let b = pt(44.39, -79.68);
        // 0.0005° of latitude north of the midpoint, ~55.6 m.
        let p = pt(44.3905, -79.69);
        let d = point_to_segment_m(&p, &a, &b);
        assert!((d - 55.6).abs() < 1.0, "got {d}");
    }

    #[test]
    fn degenerate_segment_falls_back_to_point_distance() {
        let a = pt(44.39, -79.70);
        let p = pt(44.40, -79.70);
        assert!((point_to_segment_m(&p, &a, &a) - haversine_m(&p, &a)).abs() < 1e-9);
    }

    #[test]
    fn polyline_distance_edge_cases() {
        let p = pt(44.39, -79.70);
        assert_eq!(point_to_polyline_m(&p, &[]), f64::INFINITY);

        let single = [pt(44.40, -79.70)];
        assert_eq!(point_to_polyline_m(&p, &single), haversine_m(&p, &single[0]));
    }

    #[test]
    fn polyline_distance_takes_minimum_over_segments() {
        let line = [pt(44.39, -79.70), pt(44.39, -79.69), pt(44.39, -79.68)];
        let p = pt(44.3905, -79.685);
        let d = point_to_polyline_m(&p, &line);
        // The nearest segment is the second one; distance ~55.6 m.
        assert!((d - 55.6).abs() < 1.0, "got {d}");
    }

    #[test]
    fn closest_shape_point_reports_segment_index() {
        let line = [
            pt(44.39, -79.70),
            pt(44.39, -79.69),
            pt(44.39, -79.68),
            pt(44.39, -79.67),
        ];
        let p = pt(44.391, -79.675);
        let hit = closest_shape_point(&p, &line).expect("projection");
        assert_eq!(hit.segment_index, 2);
        assert!(hit.distance_m < 200.0);
        assert!((hit.projected.lat - 44.39).abs() < 1e-9);
    }

    #[test]
    fn closest_shape_point_empty_and_single() {
        let p = pt(44.39, -79.70);
        assert!(closest_shape_point(&p, &[]).is_none());

        let single = [pt(44.40, -79.70)];
        let hit = closest_shape_point(&p, &single).expect("projection");
        assert_eq!(hit.segment_index, 0);
        assert_eq!(hit.projected, single[0]);
    }
}
