//! Environment-driven service configuration.
//!
//! Every tunable of the detector and the publisher maps to a CLI flag with a
//! `DETOUR_*` environment variable, defaulting to the agency deployment
//! values.

use clap::{ArgAction, Parser};

use detour_core::config::{DetectorConfig, PublisherConfig};

use crate::worker::WorkerConfig;

/// Real-time transit detour detection service.
#[derive(Debug, Parser)]
#[command(name = "detour_service", about = "Detects bus route detours from realtime GPS fixes")]
pub struct ServiceConfig {
    /// Realtime vehicle feed endpoint.
    #[arg(long, env = "DETOUR_VEHICLES_URL", default_value = "http://127.0.0.1:8500/vehicles")]
    pub vehicles_url: String,

    /// Static GTFS dataset endpoint.
    #[arg(long, env = "DETOUR_STATIC_DATA_URL", default_value = "http://127.0.0.1:8500/static-data")]
    pub static_data_url: String,

    /// Durable document store endpoint. Unset selects the in-memory store
    /// (dry run: nothing survives a restart).
    #[arg(long, env = "DETOUR_STORE_URL")]
    pub store_url: Option<String>,

    /// Whether the worker loop starts at all.
    #[arg(long, env = "DETOUR_WORKER_ENABLED", default_value_t = false, action = ArgAction::Set)]
    pub worker_enabled: bool,

    /// Interval between detection ticks.
    #[arg(long, env = "DETOUR_TICK_INTERVAL_MS", default_value_t = 30_000)]
    pub tick_interval_ms: u64,

    /// Distance above which a fix is off-route (meters).
    #[arg(long, env = "DETOUR_OFF_ROUTE_THRESHOLD_METERS", default_value_t = 75.0)]
    pub off_route_threshold_meters: f64,

    /// Distance below which a fix counts as on-route (meters).
    #[arg(long, env = "DETOUR_ON_ROUTE_CLEAR_THRESHOLD_METERS", default_value_t = 40.0)]
    pub on_route_clear_threshold_meters: f64,

    /// Off-route fixes required before a vehicle joins a detour.
    #[arg(long, env = "DETOUR_CONSECUTIVE_READINGS_REQUIRED", default_value_t = 3)]
    pub consecutive_readings_required: u32,

    /// In-zone on-route fixes required before a vehicle leaves a detour.
    #[arg(long, env = "DETOUR_CLEAR_CONSECUTIVE_ON_ROUTE", default_value_t = 6)]
    pub clear_consecutive_on_route: u32,

    /// Minimum detour age before any clear takes effect.
    #[arg(long, env = "DETOUR_CLEAR_GRACE_MS", default_value_t = 600_000)]
    pub clear_grace_ms: i64,

    /// Time with no off-route evidence before an empty detour clears.
    #[arg(long, env = "DETOUR_NO_VEHICLE_TIMEOUT_MS", default_value_t = 1_800_000)]
    pub no_vehicle_timeout_ms: i64,

    /// No-fix age after which a vehicle's hysteresis state is pruned.
    #[arg(long, env = "DETOUR_STALE_VEHICLE_TIMEOUT_MS", default_value_t = 300_000)]
    pub stale_vehicle_timeout_ms: i64,

    /// Evidence retention window.
    #[arg(long, env = "DETOUR_EVIDENCE_WINDOW_MS", default_value_t = 900_000)]
    pub evidence_window_ms: i64,

    /// Minimum off-route vehicles for a detour to stay active.
    #[arg(long, env = "DETOUR_MIN_VEHICLES", default_value_t = 1)]
    pub min_vehicles: usize,

    /// Minimum interval between `lastSeenAt` freshness writes.
    #[arg(long, env = "DETOUR_LAST_SEEN_THROTTLE_MS", default_value_t = 300_000)]
    pub last_seen_throttle_ms: i64,

    /// Minimum interval between geometry re-writes for an unchanged detour.
    #[arg(long, env = "DETOUR_GEOMETRY_WRITE_THROTTLE_MS", default_value_t = 120_000)]
    pub geometry_write_throttle_ms: i64,

    /// History retention horizon in days.
    #[arg(long, env = "DETOUR_HISTORY_RETENTION_DAYS", default_value_t = 30)]
    pub history_retention_days: u32,

    /// Whether history events are written at all.
    #[arg(long, env = "DETOUR_HISTORY_ENABLED", default_value_t = true, action = ArgAction::Set)]
    pub history_enabled: bool,

    /// Producer tag stamped on history events.
    #[arg(long, env = "DETOUR_SOURCE", default_value = "detour-engine")]
    pub source: String,
}

impl ServiceConfig {
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            off_route_threshold_m: self.off_route_threshold_meters,
            on_route_clear_threshold_m: self.on_route_clear_threshold_meters,
            consecutive_readings_required: self.consecutive_readings_required,
            clear_consecutive_on_route: self.clear_consecutive_on_route,
            clear_grace_ms: self.clear_grace_ms,
            no_vehicle_timeout_ms: self.no_vehicle_timeout_ms,
            stale_vehicle_timeout_ms: self.stale_vehicle_timeout_ms,
            evidence_window_ms: self.evidence_window_ms,
            min_vehicles_for_detour: self.min_vehicles,
        }
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            last_seen_throttle_ms: self.last_seen_throttle_ms,
            geometry_write_throttle_ms: self.geometry_write_throttle_ms,
            history_retention_days: self.history_retention_days,
            history_enabled: self.history_enabled,
            source: self.source.clone(),
            ..PublisherConfig::default()
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig { tick_interval_ms: self.tick_interval_ms }
    }
}
