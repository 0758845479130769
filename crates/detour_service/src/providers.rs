//! HTTP collaborators: the realtime vehicle feed and the static GTFS
//! dataset provider.
//!
//! Both use a blocking client with a bounded timeout; a timed-out fetch
//! surfaces as a [`FetchError`] and the worker counts the tick as a failure
//! without mutating any engine state. The vehicle provider filters stale
//! fixes so the detector never has to.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;

use detour_core::clock::{Clock, SystemClock};
use detour_core::model::{GeoPoint, Shape, ShapePoint, StaticData, TripShape, VehicleFix};

/// Timeout applied to every collaborator fetch.
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
/// Fixes older than this are dropped before they reach the detector.
const MAX_FIX_AGE_SECS: i64 = 300;

/// Errors while fetching from a collaborator.
#[derive(Debug)]
pub enum FetchError {
    Http(reqwest::Error),
    Json(reqwest::Error),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Http(err) => write!(f, "http error: {err}"),
            FetchError::Json(err) => write!(f, "json decode error: {err}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Http(err)
    }
}

/// Supplies the current fleet fixes each tick.
pub trait VehicleProvider {
    fn fetch_vehicles(&self) -> Result<Vec<VehicleFix>, FetchError>;
}

/// Supplies the static GTFS dataset each tick.
pub trait StaticDataProvider {
    fn static_data(&self) -> Result<StaticData, FetchError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VehicleFeed {
    vehicles: Vec<VehicleRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VehicleRecord {
    vehicle_id: String,
    #[serde(default)]
    route_id: Option<String>,
    #[serde(default)]
    trip_id: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    timestamp: i64,
}

impl VehicleRecord {
    fn into_fix(self) -> VehicleFix {
        let coordinate = match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(GeoPoint { lat, lon }),
            _ => None,
        };
        VehicleFix {
            vehicle_id: self.vehicle_id,
            route_id: self.route_id,
            trip_id: self.trip_id,
            coordinate,
            timestamp_sec: self.timestamp,
        }
    }
}

/// Drop fixes whose timestamp is older than [`MAX_FIX_AGE_SECS`].
fn filter_stale(fixes: Vec<VehicleFix>, now_sec: i64) -> Vec<VehicleFix> {
    fixes
        .into_iter()
        .filter(|fix| now_sec - fix.timestamp_sec <= MAX_FIX_AGE_SECS)
        .collect()
}

/// Blocking client for the realtime vehicle feed.
#[derive(Debug, Clone)]
pub struct HttpVehicleProvider {
    client: Client,
    url: String,
}

impl HttpVehicleProvider {
    pub fn new(url: &str) -> Self {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("failed to build vehicle feed client");
        Self { client, url: url.to_string() }
    }
}

impl VehicleProvider for HttpVehicleProvider {
    fn fetch_vehicles(&self) -> Result<Vec<VehicleFix>, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(FetchError::Http)?;
        let feed: VehicleFeed = response.json().map_err(FetchError::Json)?;
        let fixes = feed.vehicles.into_iter().map(VehicleRecord::into_fix).collect();
        Ok(filter_stale(fixes, SystemClock.now_ms() / 1000))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShapeRecord {
    shape_id: String,
    points: Vec<ShapePoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StaticFeed {
    last_refresh: i64,
    shapes: Vec<ShapeRecord>,
    route_shapes: std::collections::HashMap<String, Vec<String>>,
    trip_shapes: std::collections::HashMap<String, TripShape>,
}

impl StaticFeed {
    fn into_static_data(self) -> StaticData {
        let mut data = StaticData {
            last_refresh_ms: self.last_refresh,
            ..StaticData::default()
        };
        for record in self.shapes {
            let shape = Shape::new(record.shape_id.clone(), record.points);
            data.shapes.insert(record.shape_id, shape);
        }
        for (route_id, shape_ids) in self.route_shapes {
            data.route_shapes
                .insert(route_id, shape_ids.into_iter().collect::<HashSet<_>>());
        }
        data.trip_shapes = self.trip_shapes;
        data
    }
}

/// Blocking client for the static GTFS dataset endpoint.
#[derive(Debug, Clone)]
pub struct HttpStaticProvider {
    client: Client,
    url: String,
}

impl HttpStaticProvider {
    pub fn new(url: &str) -> Self {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("failed to build static dataset client");
        Self { client, url: url.to_string() }
    }
}

impl StaticDataProvider for HttpStaticProvider {
    fn static_data(&self) -> Result<StaticData, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(FetchError::Http)?;
        let feed: StaticFeed = response.json().map_err(FetchError::Json)?;
        Ok(feed.into_static_data())
    }
}
