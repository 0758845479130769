//! # Transit Detour Detection Core
//!
//! The engine behind real-time detour detection for a bus fleet.
//!
//! ## Overview
//!
//! This crate provides the detection engine, including:
//!
//! - **Geometry Primitives**: Haversine and longitude-scaled segment projection
//! - **Detector State Machine**: Per-vehicle hysteresis and per-route detour lifecycle
//! - **Geometry Synthesis**: Anchors, skipped segments, simplified detour paths
//! - **Publishing**: Diff-based writes to a durable document store with throttling
//!
//! ## Key Concepts
//!
//! - **Hysteresis**: A vehicle must be off-route for several consecutive fixes
//!   before it contributes to a detour, and a detour clears only through a
//!   separate, stricter path (zone-aware on-route evidence or a long timeout).
//! - **Evidence Window**: Time-bounded off-route GPS points per route, feeding
//!   both zone computation and published geometry.
//! - **Deterministic**: Every time comparison uses a single `now` captured at
//!   the start of a tick, so the whole engine is driven by injected timestamps.
//!
//! ## Example
//!
//! ```rust,no_run
//! use detour_core::config::DetectorConfig;
//! use detour_core::detector::DetourDetector;
//! use detour_core::model::StaticData;
//!
//! let mut detector = DetourDetector::new(DetectorConfig::default());
//! let data = StaticData::default();
//! let snapshots = detector.process_vehicles(&[], &data, 1_700_000_000_000);
//! assert!(snapshots.is_empty());
//! ```

pub mod clock;
pub mod config;
pub mod detector;
pub mod evidence;
pub mod geo;
pub mod geometry;
pub mod model;
pub mod publisher;
pub mod snapshot;
pub mod store;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
