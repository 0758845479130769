//! Tunable parameters for the detector and the publisher.
//!
//! Defaults match the agency deployment; every knob is overridable through
//! the service's environment configuration.

use crate::clock::{ONE_MIN_MS, ONE_SEC_MS};

/// Distance above which a fix counts as off-route (meters).
pub const DEFAULT_OFF_ROUTE_THRESHOLD_M: f64 = 75.0;
/// Distance below which a fix counts as on-route (meters). Fixes between the
/// two thresholds sit in a dead band and move no counters.
pub const DEFAULT_ON_ROUTE_CLEAR_THRESHOLD_M: f64 = 40.0;
/// Off-route fixes required before a vehicle joins a detour.
pub const DEFAULT_CONSECUTIVE_READINGS_REQUIRED: u32 = 3;
/// In-zone on-route fixes required before a vehicle leaves a detour.
pub const DEFAULT_CLEAR_CONSECUTIVE_ON_ROUTE: u32 = 6;
/// Minimum detour age before any clear takes effect.
pub const DEFAULT_CLEAR_GRACE_MS: i64 = 10 * ONE_MIN_MS;
/// Time after the last off-route evidence before an empty detour clears.
pub const DEFAULT_NO_VEHICLE_TIMEOUT_MS: i64 = 30 * ONE_MIN_MS;
/// No-fix age after which a vehicle's hysteresis state is pruned.
pub const DEFAULT_STALE_VEHICLE_TIMEOUT_MS: i64 = 5 * ONE_MIN_MS;
/// Evidence retention window.
pub const DEFAULT_EVIDENCE_WINDOW_MS: i64 = 15 * ONE_MIN_MS;
/// Minimum off-route vehicles for a detour to stay active.
pub const DEFAULT_MIN_VEHICLES_FOR_DETOUR: usize = 1;

/// Detector state-machine tunables.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub off_route_threshold_m: f64,
    pub on_route_clear_threshold_m: f64,
    pub consecutive_readings_required: u32,
    pub clear_consecutive_on_route: u32,
    pub clear_grace_ms: i64,
    pub no_vehicle_timeout_ms: i64,
    pub stale_vehicle_timeout_ms: i64,
    pub evidence_window_ms: i64,
    pub min_vehicles_for_detour: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            off_route_threshold_m: DEFAULT_OFF_ROUTE_THRESHOLD_M,
            on_route_clear_threshold_m: DEFAULT_ON_ROUTE_CLEAR_THRESHOLD_M,
            consecutive_readings_required: DEFAULT_CONSECUTIVE_READINGS_REQUIRED,
            clear_consecutive_on_route: DEFAULT_CLEAR_CONSECUTIVE_ON_ROUTE,
            clear_grace_ms: DEFAULT_CLEAR_GRACE_MS,
            no_vehicle_timeout_ms: DEFAULT_NO_VEHICLE_TIMEOUT_MS,
            stale_vehicle_timeout_ms: DEFAULT_STALE_VEHICLE_TIMEOUT_MS,
            evidence_window_ms: DEFAULT_EVIDENCE_WINDOW_MS,
            min_vehicles_for_detour: DEFAULT_MIN_VEHICLES_FOR_DETOUR,
        }
    }
}

impl DetectorConfig {
    pub fn with_thresholds(mut self, off_route_m: f64, on_route_m: f64) -> Self {
        self.off_route_threshold_m = off_route_m;
        self.on_route_clear_threshold_m = on_route_m;
        self
    }

    pub fn with_consecutive_readings(mut self, readings: u32) -> Self {
        self.consecutive_readings_required = readings;
        self
    }

    pub fn with_clear_grace_ms(mut self, grace_ms: i64) -> Self {
        self.clear_grace_ms = grace_ms;
        self
    }

    pub fn with_no_vehicle_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.no_vehicle_timeout_ms = timeout_ms;
        self
    }

    pub fn with_evidence_window_ms(mut self, window_ms: i64) -> Self {
        self.evidence_window_ms = window_ms;
        self
    }
}

/// How often `lastSeenAt` freshness is allowed to reach the store.
pub const DEFAULT_LAST_SEEN_THROTTLE_MS: i64 = 5 * ONE_MIN_MS;
/// Minimum interval between geometry re-writes for an unchanged detour.
pub const DEFAULT_GEOMETRY_WRITE_THROTTLE_MS: i64 = 2 * ONE_MIN_MS;
/// Evidence-point delta that forces a geometry re-write despite the throttle.
pub const DEFAULT_GEOMETRY_POINT_CHANGE_THRESHOLD: usize = 5;
/// History retention horizon in days.
pub const DEFAULT_HISTORY_RETENTION_DAYS: u32 = 30;
/// Minimum interval between history retention sweeps.
pub const DEFAULT_HISTORY_PRUNE_INTERVAL_MS: i64 = 60 * ONE_MIN_MS;

/// Publisher tunables and identity.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub last_seen_throttle_ms: i64,
    pub geometry_write_throttle_ms: i64,
    pub geometry_point_change_threshold: usize,
    pub history_retention_days: u32,
    pub history_prune_interval_ms: i64,
    /// When false, no history documents are written or pruned.
    pub history_enabled: bool,
    /// Producer tag stamped on every history event.
    pub source: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            last_seen_throttle_ms: DEFAULT_LAST_SEEN_THROTTLE_MS,
            geometry_write_throttle_ms: DEFAULT_GEOMETRY_WRITE_THROTTLE_MS,
            geometry_point_change_threshold: DEFAULT_GEOMETRY_POINT_CHANGE_THRESHOLD,
            history_retention_days: DEFAULT_HISTORY_RETENTION_DAYS,
            history_prune_interval_ms: DEFAULT_HISTORY_PRUNE_INTERVAL_MS,
            history_enabled: true,
            source: "detour-engine".to_string(),
        }
    }
}

impl PublisherConfig {
    pub fn with_history_enabled(mut self, enabled: bool) -> Self {
        self.history_enabled = enabled;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Retention cutoff relative to `now_ms`.
    pub fn history_cutoff_ms(&self, now_ms: i64) -> i64 {
        now_ms - i64::from(self.history_retention_days) * 86_400 * ONE_SEC_MS
    }
}
