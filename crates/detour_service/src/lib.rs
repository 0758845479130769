//! # Transit Detour Detection Service
//!
//! The long-lived process around [`detour_core`]: a fixed-interval worker
//! loop, HTTP collaborators (vehicle feed, static GTFS dataset, durable
//! document store), and environment-driven configuration.
//!
//! Data flow per tick: vehicle fetcher -> detector -> snapshot map ->
//! publisher -> durable store. Fetch failures only bump counters; the engine
//! state is never mutated on a failed tick.

pub mod config;
pub mod providers;
pub mod store_http;
pub mod worker;
