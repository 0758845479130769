//! Durable document store seam.
//!
//! The publisher talks to the store through [`DetourStore`]; the service
//! wires in an HTTP-backed implementation, and [`MemoryStore`] backs tests
//! and dry-run deployments.
//!
//! Active-detour documents are keyed by route and written with merge
//! semantics: fields absent from a patch keep their stored value, which is
//! how the publisher throttles `lastSeenAt` and the geometry block without
//! losing them. History documents are append-only and keyed by a
//! collision-resistant ID built from the event itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geometry::DetourGeometry;
use crate::publisher::HistoryEvent;
use crate::snapshot::DetourState;

/// Failure talking to the durable store. Single writes are logged and
/// swallowed by the publisher; the next tick retries through the diff.
#[derive(Debug)]
pub enum StoreError {
    /// The backend rejected or failed the operation.
    Backend(String),
    /// A document could not be encoded or decoded.
    Document(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Backend(msg) => write!(f, "store backend error: {msg}"),
            StoreError::Document(msg) => write!(f, "store document error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// The `activeDetours/{routeId}` document, doubling as the merge patch: a
/// `None` in `last_seen_at` or `geometry` means "not written this time,
/// preserve the stored value". `trigger_vehicle_id` is part of every write
/// and serializes as `null` when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveDetourDoc {
    pub route_id: String,
    pub detected_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_seen_at: Option<i64>,
    pub trigger_vehicle_id: Option<String>,
    pub vehicle_count: usize,
    pub state: DetourState,
    #[serde(flatten)]
    pub geometry: Option<DetourGeometry>,
}

impl ActiveDetourDoc {
    /// Apply `patch` onto `self` with merge semantics.
    pub fn merge_from(&mut self, patch: &ActiveDetourDoc) {
        self.detected_at = patch.detected_at;
        self.updated_at = patch.updated_at;
        self.trigger_vehicle_id = patch.trigger_vehicle_id.clone();
        self.vehicle_count = patch.vehicle_count;
        self.state = patch.state;
        if patch.last_seen_at.is_some() {
            self.last_seen_at = patch.last_seen_at;
        }
        if patch.geometry.is_some() {
            self.geometry = patch.geometry.clone();
        }
    }
}

/// Operations the publisher needs from the durable store.
pub trait DetourStore {
    /// All current `activeDetours` documents, for startup hydration.
    fn load_active_detours(&self) -> Result<Vec<ActiveDetourDoc>, StoreError>;

    /// Merge-write one `activeDetours/{routeId}` document.
    fn upsert_active_detour(
        &mut self,
        route_id: &str,
        patch: &ActiveDetourDoc,
    ) -> Result<(), StoreError>;

    /// Delete one `activeDetours/{routeId}` document.
    fn delete_active_detour(&mut self, route_id: &str) -> Result<(), StoreError>;

    /// Append one `detourHistory/{docId}` document.
    fn append_history_event(
        &mut self,
        doc_id: &str,
        event: &HistoryEvent,
    ) -> Result<(), StoreError>;

    /// Delete up to `limit` history documents with `occurredAt` before
    /// `cutoff_ms`; returns how many were deleted.
    fn prune_history_before(&mut self, cutoff_ms: i64, limit: usize)
        -> Result<usize, StoreError>;
}

/// HashMap-backed store with real merge semantics. Used by tests and as the
/// dry-run backend when no store endpoint is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    active: BTreeMap<String, ActiveDetourDoc>,
    history: BTreeMap<String, HistoryEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_detour(&self, route_id: &str) -> Option<&ActiveDetourDoc> {
        self.active.get(route_id)
    }

    pub fn active_detour_count(&self) -> usize {
        self.active.len()
    }

    /// History events ordered by document ID (which starts with occurredAt).
    pub fn history_events(&self) -> Vec<(&str, &HistoryEvent)> {
        self.history.iter().map(|(id, e)| (id.as_str(), e)).collect()
    }

    pub fn history_count(&self) -> usize {
        self.history.len()
    }
}

impl DetourStore for MemoryStore {
    fn load_active_detours(&self) -> Result<Vec<ActiveDetourDoc>, StoreError> {
        Ok(self.active.values().cloned().collect())
    }

    fn upsert_active_detour(
        &mut self,
        route_id: &str,
        patch: &ActiveDetourDoc,
    ) -> Result<(), StoreError> {
        match self.active.get_mut(route_id) {
            Some(doc) => doc.merge_from(patch),
            None => {
                self.active.insert(route_id.to_string(), patch.clone());
            }
        }
        Ok(())
    }

    fn delete_active_detour(&mut self, route_id: &str) -> Result<(), StoreError> {
        self.active.remove(route_id);
        Ok(())
    }

    fn append_history_event(
        &mut self,
        doc_id: &str,
        event: &HistoryEvent,
    ) -> Result<(), StoreError> {
        self.history.insert(doc_id.to_string(), event.clone());
        Ok(())
    }

    fn prune_history_before(
        &mut self,
        cutoff_ms: i64,
        limit: usize,
    ) -> Result<usize, StoreError> {
        let doomed: Vec<String> = self
            .history
            .iter()
            .filter(|(_, e)| e.occurred_at() < cutoff_ms)
            .take(limit)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &doomed {
            self.history.remove(id);
        }
        Ok(doomed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Confidence;

    fn base_doc(route_id: &str, updated_at: i64) -> ActiveDetourDoc {
        ActiveDetourDoc {
            route_id: route_id.to_string(),
            detected_at: 1_000,
            updated_at,
            last_seen_at: None,
            trigger_vehicle_id: Some("v1".to_string()),
            vehicle_count: 1,
            state: DetourState::Active,
            geometry: None,
        }
    }

    #[test]
    fn merge_preserves_absent_throttled_fields() {
        let mut store = MemoryStore::new();
        let mut first = base_doc("r1", 10);
        first.last_seen_at = Some(10);
        first.geometry = Some(DetourGeometry::empty(3, Some(9)));
        store.upsert_active_detour("r1", &first).unwrap();

        // Second write omits last_seen_at and geometry.
        store.upsert_active_detour("r1", &base_doc("r1", 20)).unwrap();

        let doc = store.active_detour("r1").unwrap();
        assert_eq!(doc.updated_at, 20);
        assert_eq!(doc.last_seen_at, Some(10));
        assert_eq!(
            doc.geometry.as_ref().map(|g| g.evidence_point_count),
            Some(3)
        );
    }

    #[test]
    fn doc_serialization_flattens_geometry_and_skips_absent_fields() {
        let mut doc = base_doc("r1", 10);
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("lastSeenAt").is_none());
        assert!(json.get("skippedSegmentPolyline").is_none());
        assert!(json.get("triggerVehicleId").unwrap().is_string());
        assert_eq!(json.get("state").unwrap(), "active");

        doc.geometry = Some(DetourGeometry {
            confidence: Confidence::Medium,
            ..DetourGeometry::empty(6, Some(500))
        });
        doc.last_seen_at = Some(42);
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json.get("lastSeenAt").unwrap(), 42);
        assert_eq!(json.get("confidence").unwrap(), "medium");
        assert_eq!(json.get("evidencePointCount").unwrap(), 6);
        assert!(json.get("skippedSegmentPolyline").unwrap().is_null());

        // Round-trip keeps the flattened geometry block.
        let back: ActiveDetourDoc = serde_json::from_value(json).unwrap();
        assert_eq!(back.geometry.as_ref().unwrap().confidence, Confidence::Medium);
    }

    #[test]
    fn prune_removes_only_old_events_up_to_limit() {
        let mut store = MemoryStore::new();
        for i in 0..5 {
            let event = HistoryEvent::test_cleared("r1", i * 100);
            store
                .append_history_event(&format!("{:03}-r1", i * 100), &event)
                .unwrap();
        }
        assert_eq!(store.prune_history_before(250, 2).unwrap(), 2);
        assert_eq!(store.prune_history_before(250, 10).unwrap(), 1);
        assert_eq!(store.prune_history_before(250, 10).unwrap(), 0);
        assert_eq!(store.history_count(), 2);
    }
}
