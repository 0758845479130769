//! Detour zones: the shrunk index range along the matched shape used to tell
//! "on-route inside the detour area" apart from "on-route elsewhere". Only
//! the former counts as clearing evidence.

use crate::evidence::EvidenceWindow;
use crate::geo::closest_shape_point;
use crate::geometry::{best_shape_fit, MIN_EVIDENCE_FOR_GEOMETRY};
use crate::model::{GeoPoint, StaticData};

/// Minimum index span between the anchors for a zone to exist.
const MIN_ANCHOR_SPAN: usize = 2;
/// Fraction of the anchor span shaved off each end to form the core.
const CORE_SHRINK_RATIO: f64 = 0.25;
/// A clearing fix may sit this many clear-thresholds away from the zone shape.
const ZONE_DISTANCE_FACTOR: f64 = 3.0;

/// The index range a detour occupies on its best-matching shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetourZone {
    pub shape_id: String,
    pub entry_index: usize,
    pub exit_index: usize,
    pub core_start: usize,
    pub core_end: usize,
}

impl DetourZone {
    /// Whether an on-route fix lands inside the zone core on the zone's own
    /// shape, close enough to count as clearing evidence.
    pub fn accepts_clearing_fix(
        &self,
        coord: &GeoPoint,
        data: &StaticData,
        on_route_clear_threshold_m: f64,
    ) -> bool {
        let Some(shape) = data.shapes.get(&self.shape_id) else {
            return false;
        };
        let Some(hit) = closest_shape_point(coord, &shape.points) else {
            return false;
        };
        hit.distance_m <= ZONE_DISTANCE_FACTOR * on_route_clear_threshold_m
            && (self.core_start..=self.core_end).contains(&hit.segment_index)
    }
}

/// Compute the zone for one route's evidence window, or `None` when the
/// evidence is insufficient or the anchors sit too close together.
pub fn compute_zone(
    route_id: &str,
    window: &EvidenceWindow,
    data: &StaticData,
) -> Option<DetourZone> {
    if window.len() < MIN_EVIDENCE_FOR_GEOMETRY {
        return None;
    }
    let fit = best_shape_fit(window, data, route_id)?;
    let span = fit.exit_index - fit.entry_index;
    if span < MIN_ANCHOR_SPAN {
        return None;
    }
    let shrink = (((span as f64) * CORE_SHRINK_RATIO).floor() as usize).max(1);
    Some(DetourZone {
        shape_id: fit.shape_id,
        entry_index: fit.entry_index,
        exit_index: fit.exit_index,
        core_start: fit.entry_index + shrink,
        core_end: fit.exit_index - shrink,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::EvidencePoint;
    use crate::model::{Shape, ShapePoint};

    fn straight_shape(shape_id: &str, lons: &[f64]) -> Shape {
        Shape::new(
            shape_id,
            lons.iter()
                .enumerate()
                .map(|(i, &lon)| ShapePoint { lat: 44.39, lon, sequence: i as u32 })
                .collect(),
        )
    }

    fn data_with(shape: Shape, route_id: &str) -> StaticData {
        let mut data = StaticData::default();
        data.route_shapes
            .insert(route_id.to_string(), [shape.shape_id.clone()].into());
        data.shapes.insert(shape.shape_id.clone(), shape);
        data
    }

    fn window_at(lons: &[f64]) -> EvidenceWindow {
        let mut window = EvidenceWindow::default();
        for (i, &lon) in lons.iter().enumerate() {
            window.push(EvidencePoint {
                lat: 44.395,
                lon,
                timestamp_ms: i as i64 * 1_000,
                vehicle_id: "v1".to_string(),
            });
        }
        window
    }

    #[test]
    fn zone_shrinks_anchor_span_into_core() {
        let data = data_with(
            straight_shape("s1", &[-79.70, -79.69, -79.68, -79.67, -79.66]),
            "r1",
        );
        let window = window_at(&[-79.695, -79.675, -79.665]);
        let zone = compute_zone("r1", &window, &data).expect("zone");
        assert_eq!(zone.entry_index, 0);
        assert_eq!(zone.exit_index, 3);
        // shrink = max(1, floor(3 * 0.25)) = 1
        assert_eq!(zone.core_start, 1);
        assert_eq!(zone.core_end, 2);
    }

    #[test]
    fn zone_requires_three_points_and_span() {
        let data = data_with(
            straight_shape("s1", &[-79.70, -79.69, -79.68, -79.67, -79.66]),
            "r1",
        );
        assert!(compute_zone("r1", &window_at(&[-79.695, -79.665]), &data).is_none());
        // Three points projecting onto adjacent segments: span 1 < 2.
        let narrow = window_at(&[-79.695, -79.692, -79.687]);
        assert!(compute_zone("r1", &narrow, &data).is_none());
    }

    #[test]
    fn clearing_fix_must_land_in_core() {
        let data = data_with(
            straight_shape("s1", &[-79.70, -79.69, -79.68, -79.67, -79.66]),
            "r1",
        );
        let window = window_at(&[-79.695, -79.675, -79.665]);
        let zone = compute_zone("r1", &window, &data).expect("zone");

        let in_core = GeoPoint { lat: 44.39, lon: -79.685 };
        assert!(zone.accepts_clearing_fix(&in_core, &data, 40.0));

        // On the shape but west of the core.
        let outside_core = GeoPoint { lat: 44.39, lon: -79.699 };
        assert!(!zone.accepts_clearing_fix(&outside_core, &data, 40.0));

        // In the core's index range but far from the shape (> 120 m).
        let too_far = GeoPoint { lat: 44.3915, lon: -79.685 };
        assert!(!zone.accepts_clearing_fix(&too_far, &data, 40.0));
    }
}
