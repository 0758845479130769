//! Detector state machine: converts a stream of vehicle fixes into a map of
//! active detour snapshots.
//!
//! Per tick, in order:
//!
//! 1. Refresh detour zones from the evidence windows
//! 2. Ingest fixes (hysteresis counters, add/remove vehicles)
//! 3. Prune stale vehicles
//! 4. Advance clear-pending state
//! 5. Emit one snapshot per detour, including clear-pending ones
//!
//! Hysteresis is asymmetric on purpose: a vehicle joins a detour after a few
//! strictly off-route fixes, but leaves only through in-zone on-route
//! evidence or the no-vehicle timeout. Dead-band fixes, route changes, and
//! stale pruning never count as clearing evidence.

pub mod zone;


use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::config::DetectorConfig;
use crate::evidence::{EvidencePoint, EvidenceSummary, EvidenceWindow};
use crate::geo::point_to_polyline_m;
use crate::geometry::build_geometry;
use crate::model::{GeoPoint, StaticData, VehicleFix};
use crate::snapshot::{DetourSnapshot, DetourState};

use self::zone::{compute_zone, DetourZone};

/// Per-vehicle hysteresis state. At most one of the two counters is non-zero.
#[derive(Debug, Clone)]
struct VehicleState {
    route_id: String,
    consecutive_off_route: u32,
    consecutive_on_route: u32,
    last_checked_at_ms: i64,
}

impl VehicleState {
    fn new(route_id: &str, now_ms: i64) -> Self {
        Self {
            route_id: route_id.to_string(),
            consecutive_off_route: 0,
            consecutive_on_route: 0,
            last_checked_at_ms: now_ms,
        }
    }

    fn reset_for_route(&mut self, route_id: &str) {
        self.route_id = route_id.to_string();
        self.consecutive_off_route = 0;
        self.consecutive_on_route = 0;
    }
}

/// One active detour, owned by the detector.
#[derive(Debug, Clone)]
struct Detour {
    detected_at_ms: i64,
    last_seen_at_ms: i64,
    trigger_vehicle_id: Option<String>,
    vehicles_off_route: HashSet<String>,
    state: DetourState,
    clear_pending_at_ms: Option<i64>,
    last_off_route_evidence_at_ms: i64,
    seed_vehicle_count: usize,
    zone: Option<DetourZone>,
}

impl Detour {
    fn new(trigger_vehicle_id: &str, now_ms: i64) -> Self {
        Self {
            detected_at_ms: now_ms,
            last_seen_at_ms: now_ms,
            trigger_vehicle_id: Some(trigger_vehicle_id.to_string()),
            vehicles_off_route: HashSet::new(),
            state: DetourState::Active,
            clear_pending_at_ms: None,
            last_off_route_evidence_at_ms: now_ms,
            seed_vehicle_count: 0,
            zone: None,
        }
    }
}

/// Operator-facing view of one active detour.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetourOverview {
    pub route_id: String,
    pub state: DetourState,
    pub vehicle_count: usize,
    pub detected_at_ms: i64,
    pub last_seen_at_ms: i64,
    pub trigger_vehicle_id: Option<String>,
    pub seed_vehicle_count: usize,
    pub has_zone: bool,
}

/// The detour detection state machine.
#[derive(Debug)]
pub struct DetourDetector {
    config: DetectorConfig,
    vehicles: HashMap<String, VehicleState>,
    detours: BTreeMap<String, Detour>,
    evidence: BTreeMap<String, EvidenceWindow>,
}

impl DetourDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            vehicles: HashMap::new(),
            detours: BTreeMap::new(),
            evidence: BTreeMap::new(),
        }
    }

    /// Run one detection tick over the supplied fixes.
    ///
    /// Malformed fixes (no route, no coordinate, unknown route, empty shapes)
    /// are skipped without touching any state; the tick itself never fails.
    pub fn process_vehicles(
        &mut self,
        fixes: &[VehicleFix],
        data: &StaticData,
        now_ms: i64,
    ) -> BTreeMap<String, DetourSnapshot> {
        self.refresh_zones(data, now_ms);
        for fix in fixes {
            self.ingest_fix(fix, data, now_ms);
        }
        self.prune_stale_vehicles(now_ms);
        self.advance_clear_state(now_ms);
        self.build_snapshots(data)
    }

    /// Re-insert a detour read back from the durable store at startup, so it
    /// survives a restart without being cleared before fresh evidence
    /// arrives. Never overwrites an existing detour.
    pub fn seed_active_detour(
        &mut self,
        route_id: &str,
        detected_at_ms: i64,
        last_evidence_at_ms: i64,
        seed_vehicle_count: usize,
    ) {
        if self.detours.contains_key(route_id) {
            return;
        }
        self.detours.insert(
            route_id.to_string(),
            Detour {
                detected_at_ms,
                last_seen_at_ms: last_evidence_at_ms,
                trigger_vehicle_id: None,
                vehicles_off_route: HashSet::new(),
                state: DetourState::Active,
                clear_pending_at_ms: None,
                last_off_route_evidence_at_ms: last_evidence_at_ms,
                seed_vehicle_count,
                zone: None,
            },
        );
    }

    /// Forget all per-vehicle hysteresis state. Called when the static
    /// dataset is refreshed: vehicle IDs may not survive a schedule change,
    /// but active detours and their evidence do.
    pub fn reset_vehicle_states(&mut self) {
        self.vehicles.clear();
    }

    /// Number of vehicles currently tracked for hysteresis.
    pub fn tracked_vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    /// Read-only overview of the active detour set.
    pub fn detour_overviews(&self) -> Vec<DetourOverview> {
        self.detours
            .iter()
            .map(|(route_id, d)| DetourOverview {
                route_id: route_id.clone(),
                state: d.state,
                vehicle_count: d.vehicles_off_route.len(),
                detected_at_ms: d.detected_at_ms,
                last_seen_at_ms: d.last_seen_at_ms,
                trigger_vehicle_id: d.trigger_vehicle_id.clone(),
                seed_vehicle_count: d.seed_vehicle_count,
                has_zone: d.zone.is_some(),
            })
            .collect()
    }

    /// Read-only evidence summaries for every route with a window.
    pub fn evidence_summaries(&self) -> Vec<EvidenceSummary> {
        self.evidence
            .iter()
            .map(|(route_id, window)| window.summary(route_id))
            .collect()
    }

    /// Raw evidence points for one route, newest last.
    pub fn evidence_points(&self, route_id: &str) -> Option<&[EvidencePoint]> {
        self.evidence.get(route_id).map(EvidenceWindow::points)
    }

    fn refresh_zones(&mut self, data: &StaticData, now_ms: i64) {
        let cutoff = now_ms - self.config.evidence_window_ms;
        let routes: Vec<String> = self.detours.keys().cloned().collect();
        for route_id in routes {
            let zone = match self.evidence.get_mut(&route_id) {
                Some(window) => {
                    window.prune_older_than(cutoff);
                    compute_zone(&route_id, window, data)
                }
                None => None,
            };
            if let Some(detour) = self.detours.get_mut(&route_id) {
                detour.zone = zone;
            }
        }
    }

    fn ingest_fix(&mut self, fix: &VehicleFix, data: &StaticData, now_ms: i64) {
        let Some(route_id) = fix.route_id.as_deref() else {
            return;
        };
        let Some(coord) = fix.coordinate else {
            return;
        };
        let candidates = data.candidate_shapes(route_id, fix.trip_id.as_deref());
        if candidates.is_empty() {
            return;
        }
        let min_dist = candidates
            .iter()
            .map(|shape| point_to_polyline_m(&coord, &shape.points))
            .fold(f64::INFINITY, f64::min);

        // A route change resets hysteresis and pulls the vehicle out of the
        // old route's detour, but is not on-route evidence: the old detour's
        // state is left alone.
        if let Some(prior_route) = self
            .vehicles
            .get(&fix.vehicle_id)
            .map(|s| s.route_id.clone())
            .filter(|prior| prior.as_str() != route_id)
        {
            if let Some(detour) = self.detours.get_mut(&prior_route) {
                detour.vehicles_off_route.remove(&fix.vehicle_id);
            }
            if let Some(state) = self.vehicles.get_mut(&fix.vehicle_id) {
                state.reset_for_route(route_id);
            }
        }

        let state = self
            .vehicles
            .entry(fix.vehicle_id.clone())
            .or_insert_with(|| VehicleState::new(route_id, now_ms));
        state.last_checked_at_ms = now_ms;

        if min_dist > self.config.off_route_threshold_m {
            state.consecutive_on_route = 0;
            state.consecutive_off_route += 1;
            if state.consecutive_off_route >= self.config.consecutive_readings_required {
                self.add_vehicle_to_detour(route_id, &fix.vehicle_id, &coord, now_ms);
            }
        } else if min_dist <= self.config.on_route_clear_threshold_m {
            state.consecutive_off_route = 0;
            let clearing = self.detours.get(route_id).is_some_and(|detour| {
                detour.vehicles_off_route.contains(&fix.vehicle_id)
                    && detour.zone.as_ref().is_some_and(|zone| {
                        zone.accepts_clearing_fix(
                            &coord,
                            data,
                            self.config.on_route_clear_threshold_m,
                        )
                    })
            });
            let count = match self.vehicles.get_mut(&fix.vehicle_id) {
                Some(state) if clearing => {
                    state.consecutive_on_route += 1;
                    state.consecutive_on_route
                }
                Some(state) => {
                    state.consecutive_on_route = 0;
                    0
                }
                None => 0,
            };
            if clearing && count >= self.config.clear_consecutive_on_route {
                self.maybe_remove_vehicle(route_id, &fix.vehicle_id, now_ms);
            }
        }
        // Dead band: both counters hold.
    }

    fn add_vehicle_to_detour(
        &mut self,
        route_id: &str,
        vehicle_id: &str,
        coord: &GeoPoint,
        now_ms: i64,
    ) {
        let detour = self
            .detours
            .entry(route_id.to_string())
            .or_insert_with(|| Detour::new(vehicle_id, now_ms));
        detour.vehicles_off_route.insert(vehicle_id.to_string());
        detour.last_seen_at_ms = now_ms;
        detour.last_off_route_evidence_at_ms = now_ms;
        detour.seed_vehicle_count = 0;
        if detour.state == DetourState::ClearPending {
            detour.state = DetourState::Active;
            detour.clear_pending_at_ms = None;
        }

        let window = self.evidence.entry(route_id.to_string()).or_default();
        window.push(EvidencePoint {
            lat: coord.lat,
            lon: coord.lon,
            timestamp_ms: now_ms,
            vehicle_id: vehicle_id.to_string(),
        });
        window.prune_older_than(now_ms - self.config.evidence_window_ms);
    }

    /// A vehicle has produced enough in-zone on-route fixes; remove it from
    /// the detour if the grace period allows, and start clearing when the
    /// vehicle set drops below the minimum.
    fn maybe_remove_vehicle(&mut self, route_id: &str, vehicle_id: &str, now_ms: i64) {
        let Some(detour) = self.detours.get_mut(route_id) else {
            return;
        };
        if now_ms - detour.detected_at_ms < self.config.clear_grace_ms {
            return;
        }
        detour.vehicles_off_route.remove(vehicle_id);
        if let Some(state) = self.vehicles.get_mut(vehicle_id) {
            state.consecutive_on_route = 0;
        }
        if detour.vehicles_off_route.len() >= self.config.min_vehicles_for_detour {
            return;
        }
        if detour.state != DetourState::ClearPending {
            detour.state = DetourState::ClearPending;
            detour.clear_pending_at_ms = Some(now_ms);
        }
    }

    /// Drop vehicles with no recent fix. Disappearing is not on-route
    /// evidence, so the detour state machine is untouched here; an emptied
    /// detour clears only through the no-vehicle timeout.
    fn prune_stale_vehicles(&mut self, now_ms: i64) {
        let timeout = self.config.stale_vehicle_timeout_ms;
        let stale: Vec<(String, String)> = self
            .vehicles
            .iter()
            .filter(|(_, s)| now_ms - s.last_checked_at_ms > timeout)
            .map(|(id, s)| (id.clone(), s.route_id.clone()))
            .collect();
        for (vehicle_id, route_id) in stale {
            self.vehicles.remove(&vehicle_id);
            if let Some(detour) = self.detours.get_mut(&route_id) {
                detour.vehicles_off_route.remove(&vehicle_id);
            }
        }
    }

    fn advance_clear_state(&mut self, now_ms: i64) {
        let min_vehicles = self.config.min_vehicles_for_detour;
        let mut finalized: Vec<String> = Vec::new();
        for (route_id, detour) in self.detours.iter_mut() {
            match detour.state {
                DetourState::Active => {
                    if detour.vehicles_off_route.len() < min_vehicles
                        && now_ms - detour.last_off_route_evidence_at_ms
                            >= self.config.no_vehicle_timeout_ms
                    {
                        detour.state = DetourState::ClearPending;
                        detour.clear_pending_at_ms = Some(now_ms);
                    }
                }
                DetourState::ClearPending => {
                    if detour.vehicles_off_route.len() >= min_vehicles {
                        detour.state = DetourState::Active;
                        detour.clear_pending_at_ms = None;
                    } else if now_ms - detour.detected_at_ms < self.config.clear_grace_ms {
                        // Grace not elapsed: hold.
                    } else if detour.clear_pending_at_ms.is_some_and(|at| now_ms > at) {
                        // The strict `now > clear_pending_at` comparison
                        // guarantees the clear-pending state was emitted in
                        // at least one earlier snapshot.
                        finalized.push(route_id.clone());
                    }
                }
            }
        }
        for route_id in finalized {
            self.detours.remove(&route_id);
            self.evidence.remove(&route_id);
        }
    }

    fn build_snapshots(&self, data: &StaticData) -> BTreeMap<String, DetourSnapshot> {
        self.detours
            .iter()
            .map(|(route_id, detour)| {
                let geometry = build_geometry(route_id, self.evidence.get(route_id), data);
                (
                    route_id.clone(),
                    DetourSnapshot {
                        route_id: route_id.clone(),
                        detected_at_ms: detour.detected_at_ms,
                        last_seen_at_ms: detour.last_seen_at_ms,
                        trigger_vehicle_id: detour.trigger_vehicle_id.clone(),
                        state: detour.state,
                        vehicle_count: detour.vehicles_off_route.len(),
                        geometry,
                    },
                )
            })
            .collect()
    }
}
