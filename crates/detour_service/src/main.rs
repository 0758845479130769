//! Composition root: wires the detector, publisher, providers, and worker
//! together from the environment configuration and runs the tick loop.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use log::info;

use detour_core::clock::SystemClock;
use detour_core::detector::DetourDetector;
use detour_core::publisher::DetourPublisher;
use detour_core::store::MemoryStore;
use detour_service::config::ServiceConfig;
use detour_service::providers::{HttpStaticProvider, HttpVehicleProvider};
use detour_service::store_http::{HttpDocStore, ServiceStore};
use detour_service::worker::DetourWorker;

fn main() {
    env_logger::init();
    let config = ServiceConfig::parse();

    if !config.worker_enabled {
        info!("detour worker disabled; set DETOUR_WORKER_ENABLED=true to start it");
        return;
    }

    let store = match config.store_url.as_deref() {
        Some(url) => {
            info!("publishing to document store at {url}");
            ServiceStore::Http(HttpDocStore::new(url))
        }
        None => {
            info!("no store endpoint configured; publishing to the in-memory store");
            ServiceStore::Memory(MemoryStore::new())
        }
    };

    let worker = DetourWorker::new(
        config.worker_config(),
        Arc::new(SystemClock),
        Box::new(HttpVehicleProvider::new(&config.vehicles_url)),
        Box::new(HttpStaticProvider::new(&config.static_data_url)),
        DetourDetector::new(config.detector_config()),
        DetourPublisher::new(store, config.publisher_config()),
    );

    // Runs until the process is terminated; an in-flight tick always
    // completes before the loop re-checks the flag.
    worker.run(Arc::new(AtomicBool::new(false)));
}
