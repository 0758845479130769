//! Fixed-interval worker loop: fetch -> detect -> publish, once per tick.
//!
//! Ticks never re-enter: a `tick_in_progress` flag drops (not queues) any
//! overlapping tick. Fetch failures increment `consecutive_failures` and
//! leave the engine untouched; the next tick retries. A bounded ring of
//! recent detour transitions is kept for operational introspection.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;

use detour_core::clock::Clock;
use detour_core::detector::{DetourDetector, DetourOverview};
use detour_core::evidence::EvidenceSummary;
use detour_core::publisher::DetourPublisher;
use detour_core::snapshot::{DetourSnapshot, DetourState};
use detour_core::store::DetourStore;

use crate::providers::{FetchError, StaticDataProvider, VehicleProvider};

/// Size of the recent detour-transition ring.
const RECENT_EVENTS_CAP: usize = 20;
/// Granularity of the shutdown-aware sleep between ticks.
const SLEEP_SLICE: Duration = Duration::from_millis(250);

/// Worker scheduling knobs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub tick_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { tick_interval_ms: 30_000 }
    }
}

impl WorkerConfig {
    pub fn with_tick_interval_ms(mut self, interval_ms: u64) -> Self {
        self.tick_interval_ms = interval_ms;
        self
    }
}

/// Kind of detour transition recorded in the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionKind {
    Detected,
    ClearPending,
    Reactivated,
    Cleared,
}

/// One detour transition observed by the worker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerEvent {
    pub at_ms: i64,
    pub route_id: String,
    pub kind: TransitionKind,
}

/// Operator-facing worker state, refreshed after every successful tick.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub tick_count: u64,
    pub last_successful_tick_ms: Option<i64>,
    pub consecutive_failures: u32,
    pub publish_failures: u64,
    pub last_static_refresh_ms: Option<i64>,
    pub tracked_vehicles: usize,
    pub recent_events: VecDeque<WorkerEvent>,
    pub active_detours: Vec<DetourOverview>,
    pub evidence: Vec<EvidenceSummary>,
}

/// Handle to a worker running on its own thread.
pub struct WorkerHandle {
    thread: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
    status: Arc<Mutex<WorkerStatus>>,
}

impl WorkerHandle {
    /// Snapshot of the worker's current status.
    pub fn status(&self) -> WorkerStatus {
        self.status.lock().unwrap().clone()
    }

    /// Signal shutdown and wait for the in-flight tick to complete.
    pub fn stop(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.thread.join();
    }
}

/// Drives the detection engine at a fixed interval.
pub struct DetourWorker<S: DetourStore> {
    config: WorkerConfig,
    clock: Arc<dyn Clock>,
    vehicles: Box<dyn VehicleProvider + Send>,
    static_data: Box<dyn StaticDataProvider + Send>,
    detector: DetourDetector,
    publisher: DetourPublisher<S>,
    status: Arc<Mutex<WorkerStatus>>,
    tick_in_progress: bool,
    last_static_refresh_ms: Option<i64>,
    previous_states: BTreeMap<String, DetourState>,
}

impl<S: DetourStore> DetourWorker<S> {
    pub fn new(
        config: WorkerConfig,
        clock: Arc<dyn Clock>,
        vehicles: Box<dyn VehicleProvider + Send>,
        static_data: Box<dyn StaticDataProvider + Send>,
        detector: DetourDetector,
        publisher: DetourPublisher<S>,
    ) -> Self {
        Self {
            config,
            clock,
            vehicles,
            static_data,
            detector,
            publisher,
            status: Arc::new(Mutex::new(WorkerStatus::default())),
            tick_in_progress: false,
            last_static_refresh_ms: None,
            previous_states: BTreeMap::new(),
        }
    }

    /// Shared handle to the worker status, for operator queries.
    pub fn status_handle(&self) -> Arc<Mutex<WorkerStatus>> {
        Arc::clone(&self.status)
    }

    /// Hydrate the publisher from the store and seed the detector so
    /// pre-existing detours survive the restart.
    pub fn hydrate(&mut self) {
        for seed in self.publisher.hydrate() {
            self.detector.seed_active_detour(
                &seed.route_id,
                seed.detected_at_ms,
                seed.last_evidence_at_ms,
                seed.vehicle_count,
            );
            self.previous_states
                .insert(seed.route_id.clone(), DetourState::Active);
        }
    }

    /// Run one tick. Returns false if the tick was dropped (re-entry) or
    /// failed before reaching the engine.
    pub fn tick(&mut self) -> bool {
        if self.tick_in_progress {
            warn!("tick already in progress; dropping this tick");
            return false;
        }
        self.tick_in_progress = true;
        let completed = self.run_tick();
        self.tick_in_progress = false;
        completed
    }

    fn run_tick(&mut self) -> bool {
        let now_ms = self.clock.now_ms();

        let data = match self.static_data.static_data() {
            Ok(data) => data,
            Err(err) => {
                self.record_failure("static dataset fetch", &err);
                return false;
            }
        };
        if self.last_static_refresh_ms != Some(data.last_refresh_ms) {
            if self.last_static_refresh_ms.is_some() {
                info!("static dataset refreshed; resetting vehicle hysteresis");
                self.detector.reset_vehicle_states();
            }
            self.last_static_refresh_ms = Some(data.last_refresh_ms);
        }

        let fixes = match self.vehicles.fetch_vehicles() {
            Ok(fixes) => fixes,
            Err(err) => {
                self.record_failure("vehicle feed fetch", &err);
                return false;
            }
        };

        let snapshots = self.detector.process_vehicles(&fixes, &data, now_ms);
        let transitions = self.transitions(&snapshots, now_ms);
        let outcome = self.publisher.publish_detours(&snapshots, now_ms);
        self.previous_states = snapshots
            .iter()
            .map(|(route_id, s)| (route_id.clone(), s.state))
            .collect();

        let mut status = self.status.lock().unwrap();
        status.tick_count += 1;
        status.last_successful_tick_ms = Some(now_ms);
        status.consecutive_failures = 0;
        status.publish_failures += u64::from(outcome.write_failures);
        status.last_static_refresh_ms = self.last_static_refresh_ms;
        status.tracked_vehicles = self.detector.tracked_vehicle_count();
        for event in transitions {
            if status.recent_events.len() == RECENT_EVENTS_CAP {
                status.recent_events.pop_front();
            }
            status.recent_events.push_back(event);
        }
        status.active_detours = self.detector.detour_overviews();
        status.evidence = self.detector.evidence_summaries();
        debug!(
            "tick {} complete: {} fixes, {} detour(s), {} write failure(s)",
            status.tick_count,
            fixes.len(),
            status.active_detours.len(),
            outcome.write_failures
        );
        true
    }

    fn transitions(
        &self,
        snapshots: &BTreeMap<String, DetourSnapshot>,
        now_ms: i64,
    ) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        for (route_id, snapshot) in snapshots {
            let kind = match self.previous_states.get(route_id) {
                None => TransitionKind::Detected,
                Some(prev) if *prev != snapshot.state => match snapshot.state {
                    DetourState::ClearPending => TransitionKind::ClearPending,
                    DetourState::Active => TransitionKind::Reactivated,
                },
                Some(_) => continue,
            };
            events.push(WorkerEvent { at_ms: now_ms, route_id: route_id.clone(), kind });
        }
        for route_id in self.previous_states.keys() {
            if !snapshots.contains_key(route_id) {
                events.push(WorkerEvent {
                    at_ms: now_ms,
                    route_id: route_id.clone(),
                    kind: TransitionKind::Cleared,
                });
            }
        }
        for event in &events {
            let when = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(event.at_ms)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| event.at_ms.to_string());
            info!("route {}: {:?} at {}", event.route_id, event.kind, when);
        }
        events
    }

    fn record_failure(&mut self, what: &str, err: &FetchError) {
        let mut status = self.status.lock().unwrap();
        status.tick_count += 1;
        status.consecutive_failures += 1;
        warn!(
            "{what} failed ({} consecutive): {err}",
            status.consecutive_failures
        );
    }

    /// Run ticks until `shutdown` is set. The sleep between ticks is sliced
    /// so shutdown is honored promptly while an in-flight tick still
    /// completes.
    pub fn run(mut self, shutdown: Arc<AtomicBool>) {
        let interval = Duration::from_millis(self.config.tick_interval_ms);
        info!("detour worker started (tick interval {interval:?})");
        self.hydrate();
        while !shutdown.load(Ordering::SeqCst) {
            let started = Instant::now();
            self.tick();
            while started.elapsed() < interval && !shutdown.load(Ordering::SeqCst) {
                let remaining = interval.saturating_sub(started.elapsed());
                thread::sleep(remaining.min(SLEEP_SLICE));
            }
        }
        info!("detour worker stopped");
    }

    /// Run the worker on its own thread.
    pub fn spawn(self) -> WorkerHandle
    where
        S: Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let status = self.status_handle();
        let thread_shutdown = Arc::clone(&shutdown);
        let thread = thread::spawn(move || self.run(thread_shutdown));
        WorkerHandle { thread, shutdown, status }
    }
}
