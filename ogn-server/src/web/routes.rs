//! REST API route handlers.
//!
//! Served from the in-memory tracker; every handler takes a short read lock.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use ogn_core::tracker::TrackedAircraft;

use crate::web::AppState;

fn summary(ac: &TrackedAircraft) -> Value {
    let r = &ac.latest;
    json!({
        "id": ac.id,
        "name": ac.name(),
        "source_name": r.source_name,
        "protocol": r.protocol,
        "timestamp": r.timestamp,
        "lat": r.latitude,
        "lon": r.longitude,
        "altitude_m": r.altitude_m,
        "course_deg": r.course_deg,
        "speed_kts": r.speed_kts,
        "climb_rate": r.climb_rate,
        "device_id": r.device_id,
        "flight_number": r.flight_number,
        "squawk": r.squawk,
        "trail_points": ac.trail.len(),
        "reports": ac.report_count,
        "first_seen": ac.first_seen,
        "last_seen": ac.last_seen,
        "expires_at": ac.expires_at,
    })
}

// ---------------------------------------------------------------------------
// Aircraft endpoints
// ---------------------------------------------------------------------------

/// GET /api/aircraft: all live aircraft, most recently seen first.
pub async fn api_aircraft(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.tracker.read().unwrap().snapshot();
    let aircraft: Vec<Value> = snapshot.iter().map(summary).collect();
    Json(json!(aircraft))
}

/// GET /api/aircraft/:id: one aircraft with its full trail and description.
pub async fn api_aircraft_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let tracker = state.tracker.read().unwrap();
    let Some(ac) = tracker.get(&id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Aircraft not found"})),
        )
            .into_response();
    };

    Json(json!({
        "aircraft": ac,
        "description": ac.describe(),
    }))
    .into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
