//! Per-tick external view of an active detour.

use serde::{Deserialize, Serialize};

use crate::geometry::DetourGeometry;

/// Lifecycle state of a detour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetourState {
    Active,
    ClearPending,
}

impl DetourState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetourState::Active => "active",
            DetourState::ClearPending => "clear-pending",
        }
    }
}

impl std::fmt::Display for DetourState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the detector emits for one route at the end of a tick. The internal
/// zone never leaves the detector; everything else is flattened here.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetourSnapshot {
    pub route_id: String,
    pub detected_at_ms: i64,
    pub last_seen_at_ms: i64,
    pub trigger_vehicle_id: Option<String>,
    pub state: DetourState,
    pub vehicle_count: usize,
    pub geometry: DetourGeometry,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&DetourState::Active).unwrap(),
            "\"active\""
        );
        assert_eq!(
            serde_json::to_string(&DetourState::ClearPending).unwrap(),
            "\"clear-pending\""
        );
        assert_eq!(DetourState::ClearPending.to_string(), "clear-pending");
    }
}
