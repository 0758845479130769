//! HTTP client for the durable document store, plus the backend selector
//! used by the composition root.
//!
//! The store exposes a small document API:
//!
//! - `GET    {base}/activeDetours` - all active-detour documents
//! - `PATCH  {base}/activeDetours/{routeId}` - merge-write one document
//! - `DELETE {base}/activeDetours/{routeId}` - remove one document
//! - `PUT    {base}/detourHistory/{id}` - append one history event
//! - `POST   {base}/detourHistory:prune` - delete a page of old events

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use detour_core::publisher::HistoryEvent;
use detour_core::store::{ActiveDetourDoc, DetourStore, MemoryStore, StoreError};

const STORE_TIMEOUT: Duration = Duration::from_secs(15);

fn backend_error(err: reqwest::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveDetourPage {
    detours: Vec<ActiveDetourDoc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PruneRequest {
    occurred_before: i64,
    limit: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PruneResponse {
    deleted: usize,
}

/// Blocking client for the document store endpoint.
#[derive(Debug, Clone)]
pub struct HttpDocStore {
    client: Client,
    base_url: String,
}

impl HttpDocStore {
    /// Create a client for the given store endpoint (e.g. `http://localhost:8600`).
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(STORE_TIMEOUT)
            .build()
            .expect("failed to build document store client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn active_detours_url(&self) -> String {
        format!("{}/activeDetours", self.base_url)
    }

    fn active_detour_url(&self, route_id: &str) -> String {
        format!("{}/activeDetours/{}", self.base_url, route_id)
    }

    fn history_url(&self, doc_id: &str) -> String {
        format!("{}/detourHistory/{}", self.base_url, doc_id)
    }

    fn history_prune_url(&self) -> String {
        format!("{}/detourHistory:prune", self.base_url)
    }
}

impl DetourStore for HttpDocStore {
    fn load_active_detours(&self) -> Result<Vec<ActiveDetourDoc>, StoreError> {
        let page: ActiveDetourPage = self
            .client
            .get(self.active_detours_url())
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(backend_error)?
            .json()
            .map_err(|err| StoreError::Document(err.to_string()))?;
        Ok(page.detours)
    }

    fn upsert_active_detour(
        &mut self,
        route_id: &str,
        patch: &ActiveDetourDoc,
    ) -> Result<(), StoreError> {
        self.client
            .patch(self.active_detour_url(route_id))
            .json(patch)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(backend_error)?;
        Ok(())
    }

    fn delete_active_detour(&mut self, route_id: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(self.active_detour_url(route_id))
            .send()
            .map_err(backend_error)?;
        // A document already gone is a successful delete.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        response.error_for_status().map_err(backend_error)?;
        Ok(())
    }

    fn append_history_event(
        &mut self,
        doc_id: &str,
        event: &HistoryEvent,
    ) -> Result<(), StoreError> {
        self.client
            .put(self.history_url(doc_id))
            .json(event)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(backend_error)?;
        Ok(())
    }

    fn prune_history_before(
        &mut self,
        cutoff_ms: i64,
        limit: usize,
    ) -> Result<usize, StoreError> {
        let response: PruneResponse = self
            .client
            .post(self.history_prune_url())
            .json(&PruneRequest { occurred_before: cutoff_ms, limit })
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(backend_error)?
            .json()
            .map_err(|err| StoreError::Document(err.to_string()))?;
        Ok(response.deleted)
    }
}

/// Store backend selected at startup: HTTP when an endpoint is configured,
/// in-memory for dry runs.
#[derive(Debug)]
pub enum ServiceStore {
    Http(HttpDocStore),
    Memory(MemoryStore),
}

impl DetourStore for ServiceStore {
    fn load_active_detours(&self) -> Result<Vec<ActiveDetourDoc>, StoreError> {
        match self {
            ServiceStore::Http(store) => store.load_active_detours(),
            ServiceStore::Memory(store) => store.load_active_detours(),
        }
    }

    fn upsert_active_detour(
        &mut self,
        route_id: &str,
        patch: &ActiveDetourDoc,
    ) -> Result<(), StoreError> {
        match self {
            ServiceStore::Http(store) => store.upsert_active_detour(route_id, patch),
            ServiceStore::Memory(store) => store.upsert_active_detour(route_id, patch),
        }
    }

    fn delete_active_detour(&mut self, route_id: &str) -> Result<(), StoreError> {
        match self {
            ServiceStore::Http(store) => store.delete_active_detour(route_id),
            ServiceStore::Memory(store) => store.delete_active_detour(route_id),
        }
    }

    fn append_history_event(
        &mut self,
        doc_id: &str,
        event: &HistoryEvent,
    ) -> Result<(), StoreError> {
        match self {
            ServiceStore::Http(store) => store.append_history_event(doc_id, event),
            ServiceStore::Memory(store) => store.append_history_event(doc_id, event),
        }
    }

    fn prune_history_before(
        &mut self,
        cutoff_ms: i64,
        limit: usize,
    ) -> Result<usize, StoreError> {
        match self {
            ServiceStore::Http(store) => store.prune_history_before(cutoff_ms, limit),
            ServiceStore::Memory(store) => store.prune_history_before(cutoff_ms, limit),
        }
    }
}
