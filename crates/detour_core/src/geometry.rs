//! Geometry synthesis: turn a route's evidence window into a geometric
//! description of the detour.
//!
//! The synthesizer is pure computation over in-memory state:
//!
//! - **Anchor search**: project every evidence point onto each candidate
//!   shape; the shape with the smallest total distance wins, and the spatial
//!   min/max segment indices become the entry/exit anchors.
//! - **Skipped segment**: the slice of the chosen shape between the anchors.
//! - **Inferred detour path**: the raw evidence polyline, simplified with
//!   Douglas-Peucker.
//! - **Confidence**: scored from window span, point count, and vehicle count.
//!
//! Anchors use spatial extrema, not temporal first/last. For an ongoing
//! detour the temporally last point is where the bus is *now*, not where it
//! rejoined the route.

use serde::{Deserialize, Serialize};

use crate::evidence::EvidenceWindow;
use crate::geo::{closest_shape_point, point_to_segment_m};
use crate::model::{GeoPoint, StaticData};

/// Evidence points required before any geometry is synthesized.
pub const MIN_EVIDENCE_FOR_GEOMETRY: usize = 3;
/// Douglas-Peucker tolerance in meters.
pub const DP_TOLERANCE_M: f64 = 25.0;
/// Minimum points a simplified detour path must keep to be published.
pub const MIN_SIMPLIFIED_POINTS: usize = 2;

const HIGH_MIN_SPAN_MS: i64 = 5 * 60_000;
const HIGH_MIN_POINTS: usize = 10;
const HIGH_MIN_VEHICLES: usize = 2;
const MEDIUM_MIN_SPAN_MS: i64 = 2 * 60_000;
const MEDIUM_MIN_POINTS: usize = 5;

/// How much the synthesized geometry should be trusted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    #[default]
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

/// The published geometric description of a detour. Every polyline/anchor
/// field is `None` when the evidence does not support it; `confidence`,
/// `evidence_point_count`, and `last_evidence_at_ms` are always meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetourGeometry {
    #[serde(rename = "skippedSegmentPolyline", default)]
    pub skipped_segment: Option<Vec<GeoPoint>>,
    #[serde(rename = "inferredDetourPolyline", default)]
    pub inferred_path: Option<Vec<GeoPoint>>,
    #[serde(rename = "entryPoint", default)]
    pub entry_point: Option<GeoPoint>,
    #[serde(rename = "exitPoint", default)]
    pub exit_point: Option<GeoPoint>,
    #[serde(rename = "confidence")]
    pub confidence: Confidence,
    #[serde(rename = "evidencePointCount")]
    pub evidence_point_count: usize,
    #[serde(rename = "lastEvidenceAt", default)]
    pub last_evidence_at_ms: Option<i64>,
}

impl DetourGeometry {
    /// Geometry for a detour whose evidence cannot support synthesis.
    pub fn empty(evidence_point_count: usize, last_evidence_at_ms: Option<i64>) -> Self {
        Self {
            skipped_segment: None,
            inferred_path: None,
            entry_point: None,
            exit_point: None,
            confidence: Confidence::Low,
            evidence_point_count,
            last_evidence_at_ms,
        }
    }
}

/// Best-matching shape for an evidence window, with the spatial extrema of
/// the projected segment indices.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeFit {
    pub shape_id: String,
    pub entry_index: usize,
    pub exit_index: usize,
    pub total_distance_m: f64,
}

/// Project every evidence point onto each of the route's shape variants and
/// pick the shape with the smallest total distance.
pub fn best_shape_fit(
    window: &EvidenceWindow,
    data: &StaticData,
    route_id: &str,
) -> Option<ShapeFit> {
    let mut best: Option<ShapeFit> = None;
    for shape in data.route_shape_variants(route_id) {
        let mut entry_index = usize::MAX;
        let mut exit_index = 0usize;
        let mut total = 0.0;
        for point in window.points() {
            let Some(hit) = closest_shape_point(&point.coordinate(), &shape.points) else {
                continue;
            };
            entry_index = entry_index.min(hit.segment_index);
            exit_index = exit_index.max(hit.segment_index);
            total += hit.distance_m;
        }
        if entry_index == usize::MAX {
            continue;
        }
        if best.as_ref().map_or(true, |b| total < b.total_distance_m) {
            best = Some(ShapeFit {
                shape_id: shape.shape_id.clone(),
                entry_index,
                exit_index,
                total_distance_m: total,
            });
        }
    }
    best
}

/// Build the geometric description of one route's detour.
pub fn build_geometry(
    route_id: &str,
    window: Option<&EvidenceWindow>,
    data: &StaticData,
) -> DetourGeometry {
    let Some(window) = window else {
        return DetourGeometry::empty(0, None);
    };
    let point_count = window.len();
    let last_evidence = window.newest_ms();
    if point_count < MIN_EVIDENCE_FOR_GEOMETRY {
        return DetourGeometry::empty(point_count, last_evidence);
    }
    let Some(fit) = best_shape_fit(window, data, route_id) else {
        return DetourGeometry::empty(point_count, last_evidence);
    };
    let shape = match data.shapes.get(&fit.shape_id) {
        Some(shape) if !shape.points.is_empty() => shape,
        _ => return DetourGeometry::empty(point_count, last_evidence),
    };

    let last_vertex = shape.points.len() - 1;
    let exit_vertex = fit.exit_index.min(last_vertex);
    let entry_vertex = fit.entry_index.min(last_vertex);

    let skipped: Vec<GeoPoint> = shape.points[entry_vertex..=exit_vertex].to_vec();
    let skipped_segment = if skipped.len() >= 2 { Some(skipped) } else { None };

    let simplified = douglas_peucker(&window.coordinates(), DP_TOLERANCE_M);
    let inferred_path = if simplified.len() >= MIN_SIMPLIFIED_POINTS {
        Some(simplified)
    } else {
        None
    };

    DetourGeometry {
        skipped_segment,
        inferred_path,
        entry_point: Some(shape.points[entry_vertex]),
        exit_point: Some(shape.points[exit_vertex]),
        confidence: score_confidence(window),
        evidence_point_count: point_count,
        last_evidence_at_ms: last_evidence,
    }
}

/// Confidence from the evidence window's span, size, and vehicle diversity.
pub fn score_confidence(window: &EvidenceWindow) -> Confidence {
    let span = window.span_ms();
    let points = window.len();
    if span >= HIGH_MIN_SPAN_MS
        && points >= HIGH_MIN_POINTS
        && window.unique_vehicle_count() >= HIGH_MIN_VEHICLES
    {
        Confidence::High
    } else if span >= MEDIUM_MIN_SPAN_MS && points >= MEDIUM_MIN_POINTS {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

/// Douglas-Peucker polyline simplification using the engine's longitude-scaled
/// segment distance. Output is always a subsequence of the input containing
/// the first and last points.
pub fn douglas_peucker(points: &[GeoPoint], tolerance_m: f64) -> Vec<GeoPoint> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;
    simplify_range(points, 0, points.len() - 1, tolerance_m, &mut keep);
    points
        .iter()
        .zip(&keep)
        .filter_map(|(p, &k)| k.then_some(*p))
        .collect()
}

fn simplify_range(
    points: &[GeoPoint],
    first: usize,
    last: usize,
    tolerance_m: f64,
    keep: &mut [bool],
) {
    if last <= first + 1 {
        return;
    }
    let mut max_distance = 0.0;
    let mut split = first;
    for index in (first + 1)..last {
        let d = point_to_segment_m(&points[index], &points[first], &points[last]);
        if d > max_distance {
            max_distance = d;
            split = index;
        }
    }
    if max_distance > tolerance_m {
        keep[split] = true;
        simplify_range(points, first, split, tolerance_m, keep);
        simplify_range(points, split, last, tolerance_m, keep);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::EvidencePoint;
    use crate::model::{Shape, ShapePoint};

    fn pt(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint { lat, lon }
    }

    fn evidence(points: &[(f64, f64, i64, &str)]) -> EvidenceWindow {
        let mut window = EvidenceWindow::default();
        for &(lat, lon, ts, vehicle) in points {
            window.push(EvidencePoint {
                lat,
                lon,
                timestamp_ms: ts,
                vehicle_id: vehicle.to_string(),
            });
        }
        window
    }

    fn straight_shape(shape_id: &str, lons: &[f64]) -> Shape {
        Shape::new(
            shape_id,
            lons.iter()
                .enumerate()
                .map(|(i, &lon)| ShapePoint { lat: 44.39, lon, sequence: i as u32 })
                .collect(),
        )
    }

    fn data_with(shapes: Vec<Shape>, route_id: &str) -> StaticData {
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

    #[test]
    fn dp_zero_tolerance_keeps_corners() {
        let points = vec![pt(44.39, -79.70), pt(44.40, -79.69), pt(44.39, -79.68)];
        assert_eq!(douglas_peucker(&points, 0.0), points);
    }

    #[test]
    fn dp_large_tolerance_returns_endpoints() {
        let points = vec![
            pt(44.39, -79.70),
            pt(44.40, -79.69),
            pt(44.39, -79.68),
            pt(44.41, -79.67),
            pt(44.39, -79.66),
        ];
        let simplified = douglas_peucker(&points, 1.0e9);
        assert_eq!(simplified, vec![points[0], points[4]]);
    }

    #[test]
    fn dp_output_is_subsequence_with_endpoints() {
        let points: Vec<GeoPoint> = (0..20)
            .map(|i| pt(44.39 + 0.001 * ((i % 3) as f64), -79.70 + 0.002 * i as f64))
            .collect();
        let simplified = douglas_peucker(&points, 25.0);
        assert_eq!(simplified.first(), points.first());
        assert_eq!(simplified.last(), points.last());
        // Subsequence check: every kept point appears in order in the input.
        let mut cursor = 0;
        for kept in &simplified {
            let found = points[cursor..].iter().position(|p| p == kept);
            let offset = found.expect("kept point must come from the input");
            cursor += offset + 1;
        }
    }

    #[test]
    fn dp_collapses_collinear_run() {
        let points: Vec<GeoPoint> = (0..10).map(|i| pt(44.39, -79.70 + 0.001 * i as f64)).collect();
        let simplified = douglas_peucker(&points, 25.0);
        assert_eq!(simplified.len(), 2);
    }

    #[test]
    fn anchors_use_spatial_extrema_not_temporal_order() {
        let shape = straight_shape("s1", &[-79.70, -79.69, -79.68, -79.67, -79.66]);
        let data = data_with(vec![shape], "r1");
        // Temporally the bus wanders east then back west; spatially the
        // evidence spans segments 0..=3.
        let window = evidence(&[
            (44.395, -79.665, 3_000, "v1"),
            (44.395, -79.695, 1_000, "v1"),
            (44.395, -79.675, 2_000, "v1"),
        ]);
        let fit = best_shape_fit(&window, &data, "r1").expect("fit");
        assert_eq!(fit.shape_id, "s1");
        assert_eq!(fit.entry_index, 0);
        assert_eq!(fit.exit_index, 3);
    }

    #[test]
    fn best_fit_picks_closest_shape_variant() {
        let near = straight_shape("near", &[-79.70, -79.69, -79.68]);
        let mut far = straight_shape("far", &[-79.70, -79.69, -79.68]);
        for p in &mut far.points {
            p.lat += 0.1;
        }
        let data = data_with(vec![near, far], "r1");
        let window = evidence(&[
            (44.395, -79.695, 1_000, "v1"),
            (44.395, -79.690, 2_000, "v1"),
            (44.395, -79.685, 3_000, "v1"),
        ]);
        let fit = best_shape_fit(&window, &data, "r1").expect("fit");
        assert_eq!(fit.shape_id, "near");
    }

    #[test]
    fn build_geometry_requires_minimum_evidence() {
        let data = data_with(vec![straight_shape("s1", &[-79.70, -79.69])], "r1");
        let window = evidence(&[(44.395, -79.695, 1_000, "v1")]);
        let geometry = build_geometry("r1", Some(&window), &data);
        assert_eq!(geometry.confidence, Confidence::Low);
        assert!(geometry.skipped_segment.is_none());
        assert!(geometry.entry_point.is_none());
        assert_eq!(geometry.evidence_point_count, 1);
        assert_eq!(geometry.last_evidence_at_ms, Some(1_000));
    }

    #[test]
    fn build_geometry_without_candidate_shapes_is_empty() {
        let data = StaticData::default();
        let window = evidence(&[
            (44.395, -79.695, 1_000, "v1"),
            (44.395, -79.690, 2_000, "v1"),
            (44.395, -79.685, 3_000, "v1"),
        ]);
        let geometry = build_geometry("r1", Some(&window), &data);
        assert!(geometry.skipped_segment.is_none());
        assert!(geometry.inferred_path.is_none());
        assert_eq!(geometry.evidence_point_count, 3);
    }

    #[test]
    fn build_geometry_slices_skipped_segment_and_anchors() {
        let shape = straight_shape("s1", &[-79.70, -79.69, -79.68, -79.67, -79.66]);
        let data = data_with(vec![shape], "r1");
        let window = evidence(&[
            (44.395, -79.695, 0, "v1"),
            (44.395, -79.680, 60_000, "v1"),
            (44.395, -79.665, 120_000, "v1"),
        ]);
        let geometry = build_geometry("r1", Some(&window), &data);
        let skipped = geometry.skipped_segment.expect("skipped segment");
        // Anchors at segments 0 and 3: vertices 0..=3.
        assert_eq!(skipped.len(), 4);
        assert_eq!(geometry.entry_point, Some(pt(44.39, -79.70)));
        assert_eq!(geometry.exit_point, Some(pt(44.39, -79.67)));
        assert!(geometry.inferred_path.is_some());
        assert_eq!(geometry.evidence_point_count, 3);
    }

    #[test]
    fn skipped_segment_needs_two_vertices() {
        let shape = straight_shape("s1", &[-79.70, -79.69, -79.68]);
        let data = data_with(vec![shape], "r1");
        // All evidence projects onto segment 1.
        let window = evidence(&[
            (44.395, -79.684, 0, "v1"),
            (44.395, -79.683, 1_000, "v1"),
            (44.395, -79.682, 2_000, "v1"),
        ]);
        let geometry = build_geometry("r1", Some(&window), &data);
        assert!(geometry.skipped_segment.is_none());
        // Entry and exit anchors collapse onto the same vertex.
        assert_eq!(geometry.entry_point, geometry.exit_point);
    }

    #[test]
    fn confidence_tiers() {
        // Low: short and sparse.
        let low = evidence(&[
            (44.0, -79.0, 0, "a"),
            (44.0, -79.0, 1_000, "a"),
            (44.0, -79.0, 2_000, "a"),
        ]);
        assert_eq!(score_confidence(&low), Confidence::Low);

        // Medium: >= 2 min span, >= 5 points, single vehicle.
        let medium = evidence(&[
            (44.0, -79.0, 0, "a"),
            (44.0, -79.0, 30_000, "a"),
            (44.0, -79.0, 60_000, "a"),
            (44.0, -79.0, 90_000, "a"),
            (44.0, -79.0, 121_000, "a"),
        ]);
        assert_eq!(score_confidence(&medium), Confidence::Medium);

        // High: >= 5 min span, >= 10 points, >= 2 vehicles.
        let mut pts = Vec::new();
        for i in 0..10 {
            let vehicle = if i % 2 == 0 { "a" } else { "b" };
            pts.push((44.0, -79.0, i * 34_000, vehicle));
        }
        let high = evidence(&pts);
        assert_eq!(score_confidence(&high), Confidence::High);
    }

    #[test]
    fn geometry_serializes_wire_field_names() {
        let geometry = DetourGeometry::empty(2, Some(5_000));
        let json = serde_json::to_value(&geometry).unwrap();
        assert!(json.get("skippedSegmentPolyline").unwrap().is_null());
        assert!(json.get("inferredDetourPolyline").unwrap().is_null());
        assert_eq!(json.get("confidence").unwrap(), "low");
        assert_eq!(json.get("evidencePointCount").unwrap(), 2);
        assert_eq!(json.get("lastEvidenceAt").unwrap(), 5_000);
    }
}
