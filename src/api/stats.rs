//! Point-in-time query handlers.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::core::{DeviceRecord, Snapshot};
use crate::error::MonitorError;

use super::state::AppState;

/// Liveness check.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Fresh snapshot of every device, independent of the broadcast cadence.
pub async fn get_stats(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.monitor.get_snapshot())
}

/// One device by hardware address. Lookup is case-insensitive.
pub async fn get_device(
    State(state): State<AppState>,
    Path(mac): Path<String>,
) -> Result<Json<DeviceRecord>, MonitorError> {
    let identity = mac.trim().to_ascii_lowercase();
    if identity.is_empty() {
        return Err(MonitorError::InvalidInput("empty device address".into()));
    }
    state
        .monitor
        .get_device(&identity)
        .map(Json)
        .ok_or(MonitorError::NotFound(mac))
}
