//! Evidence bookkeeping: confirmed off-route observations per route.

use serde::Serialize;

use crate::model::GeoPoint;

/// One confirmed off-route observation contributed to a detour.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidencePoint {
    pub lat: f64,
    pub lon: f64,
    pub timestamp_ms: i64,
    pub vehicle_id: String,
}

impl EvidencePoint {
    pub fn coordinate(&self) -> GeoPoint {
        GeoPoint { lat: self.lat, lon: self.lon }
    }
}

/// Time-bounded, temporally-ordered off-route evidence for one route.
#[derive(Debug, Clone, Default)]
pub struct EvidenceWindow {
    points: Vec<EvidencePoint>,
}

impl EvidenceWindow {
    pub fn push(&mut self, point: EvidencePoint) {
        self.points.push(point);
    }

    /// Drop points older than `cutoff_ms`, keeping arrival order.
    pub fn prune_older_than(&mut self, cutoff_ms: i64) {
        self.points.retain(|p| p.timestamp_ms >= cutoff_ms);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[EvidencePoint] {
        &self.points
    }

    /// Evidence coordinates in temporal order.
    pub fn coordinates(&self) -> Vec<GeoPoint> {
        self.points.iter().map(EvidencePoint::coordinate).collect()
    }

    pub fn oldest_ms(&self) -> Option<i64> {
        self.points.iter().map(|p| p.timestamp_ms).min()
    }

    pub fn newest_ms(&self) -> Option<i64> {
        self.points.iter().map(|p| p.timestamp_ms).max()
    }

    /// Time spanned by the retained evidence, zero when fewer than two points.
    pub fn span_ms(&self) -> i64 {
        match (self.oldest_ms(), self.newest_ms()) {
            (Some(oldest), Some(newest)) => newest - oldest,
            _ => 0,
        }
    }

    pub fn unique_vehicle_count(&self) -> usize {
        let mut ids: Vec<&str> = self.points.iter().map(|p| p.vehicle_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    pub fn summary(&self, route_id: &str) -> EvidenceSummary {
        EvidenceSummary {
            route_id: route_id.to_string(),
            point_count: self.len(),
            oldest_ms: self.oldest_ms(),
            newest_ms: self.newest_ms(),
            unique_vehicles: self.unique_vehicle_count(),
        }
    }
}

/// Operator-facing view of one route's evidence window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceSummary {
    pub route_id: String,
    pub point_count: usize,
    pub oldest_ms: Option<i64>,
    pub newest_ms: Option<i64>,
    pub unique_vehicles: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(ts: i64, vehicle: &str) -> EvidencePoint {
        EvidencePoint {
            lat: 44.39,
            lon: -79.70,
            timestamp_ms: ts,
            vehicle_id: vehicle.to_string(),
        }
    }

    #[test]
    fn prune_keeps_points_at_or_after_cutoff() {
        let mut window = EvidenceWindow::default();
        window.push(point(100, "a"));
        window.push(point(200, "a"));
        window.push(point(300, "b"));
        window.prune_older_than(200);
        assert_eq!(window.len(), 2);
        assert_eq!(window.oldest_ms(), Some(200));
    }

    #[test]
    fn span_and_unique_vehicles() {
        let mut window = EvidenceWindow::default();
        assert_eq!(window.span_ms(), 0);
        window.push(point(1_000, "a"));
        window.push(point(4_000, "b"));
        window.push(point(7_000, "a"));
        assert_eq!(window.span_ms(), 6_000);
        assert_eq!(window.unique_vehicle_count(), 2);
    }

    #[test]
    fn summary_reflects_window() {
        let mut window = EvidenceWindow::default();
        window.push(point(10, "a"));
        window.push(point(20, "b"));
        let summary = window.summary("r1");
        assert_eq!(summary.route_id, "r1");
        assert_eq!(summary.point_count, 2);
        assert_eq!(summary.oldest_ms, Some(10));
        assert_eq!(summary.newest_ms, Some(20));
        assert_eq!(summary.unique_vehicles, 2);
    }
}
