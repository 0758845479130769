//! Publisher: reconciles the detector's snapshot map against the durable
//! store with minimum write amplification, and derives an immutable history
//! of detour transitions.
//!
//! The publisher never trusts its own writes: internal bookkeeping is only
//! updated after a store write succeeds, so a failed write in one tick is
//! retried by the next tick's diff. History writes are best-effort and never
//! block the active-detour update.

use std::collections::{BTreeMap, HashMap};

use log::{info, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;

use crate::config::PublisherConfig;
use crate::geometry::Confidence;
use crate::snapshot::{DetourSnapshot, DetourState};
use crate::store::{ActiveDetourDoc, DetourStore};

/// Maximum retention-prune batches per publish invocation.
const MAX_PRUNE_BATCHES: usize = 10;
/// Documents deleted per retention-prune batch.
const PRUNE_BATCH_SIZE: usize = 200;
/// Length of the random suffix in history document IDs.
const HISTORY_ID_SUFFIX_LEN: usize = 6;

/// The last values written to the store for one route, kept purely for
/// diffing and history derivation.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedSnapshot {
    pub detected_at_ms: i64,
    pub last_seen_at_ms: i64,
    pub updated_at_ms: i64,
    pub trigger_vehicle_id: Option<String>,
    pub vehicle_count: usize,
    pub state: DetourState,
    pub confidence: Confidence,
    pub evidence_point_count: usize,
    pub last_evidence_at_ms: Option<i64>,
}

/// Geometry fields tracked every tick to drive the write-throttle decision,
/// independent of what was actually written.
#[derive(Debug, Clone, Copy, PartialEq)]
struct GeometryFingerprint {
    confidence: Confidence,
    evidence_point_count: usize,
}

/// One immutable detour transition, written to `detourHistory/{id}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "eventType")]
pub enum HistoryEvent {
    #[serde(rename = "DETOUR_DETECTED", rename_all = "camelCase")]
    Detected {
        route_id: String,
        occurred_at: i64,
        detected_at: i64,
        last_seen_at: i64,
        trigger_vehicle_id: Option<String>,
        vehicle_count: usize,
        confidence: Confidence,
        evidence_point_count: usize,
        source: String,
    },
    #[serde(rename = "DETOUR_UPDATED", rename_all = "camelCase")]
    Updated {
        route_id: String,
        occurred_at: i64,
        detected_at: i64,
        last_seen_at: i64,
        trigger_vehicle_id: Option<String>,
        previous_trigger_vehicle_id: Option<String>,
        vehicle_count: usize,
        previous_vehicle_count: usize,
        changed_fields: Vec<String>,
        source: String,
    },
    #[serde(rename = "DETOUR_CLEARED", rename_all = "camelCase")]
    Cleared {
        route_id: String,
        occurred_at: i64,
        detected_at: i64,
        cleared_at: i64,
        duration_ms: i64,
        trigger_vehicle_id: Option<String>,
        previous_vehicle_count: usize,
        source: String,
    },
}

impl HistoryEvent {
    pub fn occurred_at(&self) -> i64 {
        match self {
            HistoryEvent::Detected { occurred_at, .. }
            | HistoryEvent::Updated { occurred_at, .. }
            | HistoryEvent::Cleared { occurred_at, .. } => *occurred_at,
        }
    }

    pub fn route_id(&self) -> &str {
        match self {
            HistoryEvent::Detected { route_id, .. }
            | HistoryEvent::Updated { route_id, .. }
            | HistoryEvent::Cleared { route_id, .. } => route_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            HistoryEvent::Detected { .. } => "DETOUR_DETECTED",
            HistoryEvent::Updated { .. } => "DETOUR_UPDATED",
            HistoryEvent::Cleared { .. } => "DETOUR_CLEARED",
        }
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl HistoryEvent {
    /// A minimal cleared event for store tests.
    pub fn test_cleared(route_id: &str, occurred_at: i64) -> Self {
        HistoryEvent::Cleared {
            route_id: route_id.to_string(),
            occurred_at,
            detected_at: 0,
            cleared_at: occurred_at,
            duration_ms: occurred_at,
            trigger_vehicle_id: None,
            previous_vehicle_count: 0,
            source: "test".to_string(),
        }
    }
}

/// History document ID: `{occurredAt}-{routeId}-{eventType}-{random6}`. The
/// random suffix keeps IDs unique under clock skew.
fn history_doc_id(event: &HistoryEvent) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(HISTORY_ID_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!(
        "{}-{}-{}-{}",
        event.occurred_at(),
        event.route_id(),
        event.event_type(),
        suffix
    )
}

/// Which of the history-relevant fields changed between two publishes.
fn changed_fields(prev: &PublishedSnapshot, snapshot: &DetourSnapshot) -> Vec<String> {
    let mut changed = Vec::new();
    if prev.vehicle_count != snapshot.vehicle_count {
        changed.push("vehicleCount".to_string());
    }
    if prev.trigger_vehicle_id != snapshot.trigger_vehicle_id {
        changed.push("triggerVehicleId".to_string());
    }
    if prev.state != snapshot.state {
        changed.push("state".to_string());
    }
    if prev.confidence != snapshot.geometry.confidence {
        changed.push("confidence".to_string());
    }
    if prev.evidence_point_count != snapshot.geometry.evidence_point_count {
        changed.push("evidencePointCount".to_string());
    }
    changed
}

/// A detour read back from the store at startup, to be re-seeded into the
/// detector so it survives the restart.
#[derive(Debug, Clone, PartialEq)]
pub struct SeededDetour {
    pub route_id: String,
    pub detected_at_ms: i64,
    pub last_evidence_at_ms: i64,
    pub vehicle_count: usize,
}

/// Per-publish bookkeeping surfaced to the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    pub routes_written: u32,
    pub routes_deleted: u32,
    pub write_failures: u32,
    pub history_events: u32,
    pub history_failures: u32,
    pub pruned_history: usize,
}

/// Reconciles detour snapshots against the durable store.
#[derive(Debug)]
pub struct DetourPublisher<S: DetourStore> {
    config: PublisherConfig,
    store: S,
    last_published: BTreeMap<String, PublishedSnapshot>,
    last_seen_update_ms: HashMap<String, i64>,
    last_geometry_write_ms: HashMap<String, i64>,
    last_known_geometry: HashMap<String, GeometryFingerprint>,
    last_history_prune_ms: Option<i64>,
    hydrated: bool,
}

impl<S: DetourStore> DetourPublisher<S> {
    pub fn new(store: S, config: PublisherConfig) -> Self {
        Self {
            config,
            store,
            last_published: BTreeMap::new(),
            last_seen_update_ms: HashMap::new(),
            last_geometry_write_ms: HashMap::new(),
            last_known_geometry: HashMap::new(),
            last_history_prune_ms: None,
            hydrated: false,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Read all active-detour documents and prime the diff state, so
    /// pre-existing detours re-publish as updates rather than detections.
    /// Returns the detours the detector should be seeded with. A failed read
    /// is logged and leaves the publisher empty; the affected detours will be
    /// re-emitted as detections, which the receiver tolerates.
    pub fn hydrate(&mut self) -> Vec<SeededDetour> {
        let mut seeds = Vec::new();
        match self.store.load_active_detours() {
            Ok(docs) => {
                for doc in docs {
                    let last_seen = doc.last_seen_at.unwrap_or(doc.updated_at);
                    let confidence = doc
                        .geometry
                        .as_ref()
                        .map(|g| g.confidence)
                        .unwrap_or_default();
                    let evidence_point_count = doc
                        .geometry
                        .as_ref()
                        .map(|g| g.evidence_point_count)
                        .unwrap_or(0);
                    let last_evidence = doc
                        .geometry
                        .as_ref()
                        .and_then(|g| g.last_evidence_at_ms);
                    seeds.push(SeededDetour {
                        route_id: doc.route_id.clone(),
                        detected_at_ms: doc.detected_at,
                        last_evidence_at_ms: last_evidence.unwrap_or(last_seen),
                        vehicle_count: doc.vehicle_count,
                    });
                    self.last_seen_update_ms
                        .insert(doc.route_id.clone(), last_seen);
                    self.last_known_geometry.insert(
                        doc.route_id.clone(),
                        GeometryFingerprint { confidence, evidence_point_count },
                    );
                    self.last_published.insert(
                        doc.route_id.clone(),
                        PublishedSnapshot {
                            detected_at_ms: doc.detected_at,
                            last_seen_at_ms: last_seen,
                            updated_at_ms: doc.updated_at,
                            trigger_vehicle_id: doc.trigger_vehicle_id,
                            vehicle_count: doc.vehicle_count,
                            state: doc.state,
                            confidence,
                            evidence_point_count,
                            last_evidence_at_ms: last_evidence,
                        },
                    );
                }
                info!(
                    "publisher hydrated {} active detour(s)",
                    self.last_published.len()
                );
            }
            Err(err) => {
                warn!("publisher hydration failed, continuing with empty state: {err}");
            }
        }
        self.hydrated = true;
        seeds
    }

    /// Reconcile one tick's snapshots against the store.
    pub fn publish_detours(
        &mut self,
        snapshots: &BTreeMap<String, DetourSnapshot>,
        now_ms: i64,
    ) -> PublishOutcome {
        let mut outcome = PublishOutcome::default();
        if !self.hydrated {
            self.hydrate();
        }

        let vanished: Vec<String> = self
            .last_published
            .keys()
            .filter(|route_id| !snapshots.contains_key(*route_id))
            .cloned()
            .collect();
        for route_id in vanished {
            self.delete_route(&route_id, now_ms, &mut outcome);
        }

        for (route_id, snapshot) in snapshots {
            self.upsert_route(route_id, snapshot, now_ms, &mut outcome);
        }

        self.maybe_prune_history(now_ms, &mut outcome);
        outcome
    }

    fn delete_route(&mut self, route_id: &str, now_ms: i64, outcome: &mut PublishOutcome) {
        let Some(prev) = self.last_published.get(route_id).cloned() else {
            return;
        };
        if let Err(err) = self.store.delete_active_detour(route_id) {
            warn!("failed to delete active detour doc for route {route_id}: {err}");
            outcome.write_failures += 1;
            return;
        }
        info!(
            "route {route_id}: detour cleared after {} ms",
            now_ms - prev.detected_at_ms
        );
        self.emit_history(
            HistoryEvent::Cleared {
                route_id: route_id.to_string(),
                occurred_at: now_ms,
                detected_at: prev.detected_at_ms,
                cleared_at: now_ms,
                duration_ms: now_ms - prev.detected_at_ms,
                trigger_vehicle_id: prev.trigger_vehicle_id.clone(),
                previous_vehicle_count: prev.vehicle_count,
                source: self.config.source.clone(),
            },
            outcome,
        );
        self.last_published.remove(route_id);
        self.last_seen_update_ms.remove(route_id);
        self.last_geometry_write_ms.remove(route_id);
        self.last_known_geometry.remove(route_id);
        outcome.routes_deleted += 1;
    }

    fn upsert_route(
        &mut self,
        route_id: &str,
        snapshot: &DetourSnapshot,
        now_ms: i64,
        outcome: &mut PublishOutcome,
    ) {
        let prev = self.last_published.get(route_id).cloned();
        let is_new = prev.is_none();
        let update_last_seen = is_new
            || self
                .last_seen_update_ms
                .get(route_id)
                .map_or(true, |t| now_ms - t >= self.config.last_seen_throttle_ms);
        let write_geometry = self.should_write_geometry(route_id, snapshot, prev.as_ref(), now_ms);

        let patch = ActiveDetourDoc {
            route_id: route_id.to_string(),
            detected_at: snapshot.detected_at_ms,
            updated_at: now_ms,
            last_seen_at: update_last_seen.then_some(snapshot.last_seen_at_ms),
            trigger_vehicle_id: snapshot.trigger_vehicle_id.clone(),
            vehicle_count: snapshot.vehicle_count,
            state: snapshot.state,
            geometry: write_geometry.then(|| snapshot.geometry.clone()),
        };
        if let Err(err) = self.store.upsert_active_detour(route_id, &patch) {
            // Bookkeeping stays untouched so the next tick retries this diff.
            warn!("failed to write active detour doc for route {route_id}: {err}");
            outcome.write_failures += 1;
            return;
        }
        outcome.routes_written += 1;

        if is_new {
            info!(
                "route {route_id}: detour detected ({} vehicle(s), {})",
                snapshot.vehicle_count, snapshot.geometry.confidence.as_str()
            );
            self.emit_history(
                HistoryEvent::Detected {
                    route_id: route_id.to_string(),
                    occurred_at: now_ms,
                    detected_at: snapshot.detected_at_ms,
                    last_seen_at: snapshot.last_seen_at_ms,
                    trigger_vehicle_id: snapshot.trigger_vehicle_id.clone(),
                    vehicle_count: snapshot.vehicle_count,
                    confidence: snapshot.geometry.confidence,
                    evidence_point_count: snapshot.geometry.evidence_point_count,
                    source: self.config.source.clone(),
                },
                outcome,
            );
        } else if let Some(prev) = prev.as_ref() {
            let changed = changed_fields(prev, snapshot);
            if !changed.is_empty() {
                self.emit_history(
                    HistoryEvent::Updated {
                        route_id: route_id.to_string(),
                        occurred_at: now_ms,
                        detected_at: snapshot.detected_at_ms,
                        last_seen_at: snapshot.last_seen_at_ms,
                        trigger_vehicle_id: snapshot.trigger_vehicle_id.clone(),
                        previous_trigger_vehicle_id: prev.trigger_vehicle_id.clone(),
                        vehicle_count: snapshot.vehicle_count,
                        previous_vehicle_count: prev.vehicle_count,
                        changed_fields: changed,
                        source: self.config.source.clone(),
                    },
                    outcome,
                );
            }
        }

        self.last_published.insert(
            route_id.to_string(),
            PublishedSnapshot {
                detected_at_ms: snapshot.detected_at_ms,
                last_seen_at_ms: snapshot.last_seen_at_ms,
                updated_at_ms: now_ms,
                trigger_vehicle_id: snapshot.trigger_vehicle_id.clone(),
                vehicle_count: snapshot.vehicle_count,
                state: snapshot.state,
                confidence: snapshot.geometry.confidence,
                evidence_point_count: snapshot.geometry.evidence_point_count,
                last_evidence_at_ms: snapshot.geometry.last_evidence_at_ms,
            },
        );
        if update_last_seen {
            self.last_seen_update_ms.insert(route_id.to_string(), now_ms);
        }
        if write_geometry {
            self.last_geometry_write_ms
                .insert(route_id.to_string(), now_ms);
        }
        // Tracked every tick, decoupled from whether geometry was written.
        self.last_known_geometry.insert(
            route_id.to_string(),
            GeometryFingerprint {
                confidence: snapshot.geometry.confidence,
                evidence_point_count: snapshot.geometry.evidence_point_count,
            },
        );
    }

    fn should_write_geometry(
        &self,
        route_id: &str,
        snapshot: &DetourSnapshot,
        prev: Option<&PublishedSnapshot>,
        now_ms: i64,
    ) -> bool {
        let Some(prev) = prev else {
            return true;
        };
        if prev.state != snapshot.state {
            return true;
        }
        let Some(known) = self.last_known_geometry.get(route_id) else {
            return true;
        };
        if known.confidence != snapshot.geometry.confidence {
            return true;
        }
        if known
            .evidence_point_count
            .abs_diff(snapshot.geometry.evidence_point_count)
            >= self.config.geometry_point_change_threshold
        {
            return true;
        }
        self.last_geometry_write_ms
            .get(route_id)
            .map_or(true, |t| now_ms - t >= self.config.geometry_write_throttle_ms)
    }

    fn emit_history(&mut self, event: HistoryEvent, outcome: &mut PublishOutcome) {
        if !self.config.history_enabled {
            return;
        }
        let doc_id = history_doc_id(&event);
        match self.store.append_history_event(&doc_id, &event) {
            Ok(()) => outcome.history_events += 1,
            Err(err) => {
                warn!(
                    "failed to write {} history event for route {}: {err}",
                    event.event_type(),
                    event.route_id()
                );
                outcome.history_failures += 1;
            }
        }
    }

    fn maybe_prune_history(&mut self, now_ms: i64, outcome: &mut PublishOutcome) {
        if !self.config.history_enabled {
            return;
        }
        if self
            .last_history_prune_ms
            .is_some_and(|t| now_ms - t < self.config.history_prune_interval_ms)
        {
            return;
        }
        self.last_history_prune_ms = Some(now_ms);
        let cutoff = self.config.history_cutoff_ms(now_ms);
        for _ in 0..MAX_PRUNE_BATCHES {
            match self.store.prune_history_before(cutoff, PRUNE_BATCH_SIZE) {
                Ok(deleted) => {
                    outcome.pruned_history += deleted;
                    if deleted < PRUNE_BATCH_SIZE {
                        break;
                    }
                }
                Err(err) => {
                    warn!("history retention prune failed: {err}");
                    break;
                }
            }
        }
    }
}
