//! Health check endpoints
//!
//! `GET /` is the probe load balancers route on; `GET /healthz` adds the
//! quarantine reason for operators.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::lifecycle::ServiceHealth;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: ServiceHealth,
    pub version: &'static str,
    pub service: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quarantined_at: Option<DateTime<Utc>>,
}

fn status_for(health: ServiceHealth) -> StatusCode {
    match health {
        ServiceHealth::Alive => StatusCode::OK,
        ServiceHealth::Quarantined => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// GET /
pub async fn probe(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match state.lifecycle().health() {
        ServiceHealth::Alive => (StatusCode::OK, "OK"),
        ServiceHealth::Quarantined => (StatusCode::SERVICE_UNAVAILABLE, "BUSY"),
    }
}

/// GET /healthz
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let record = state.lifecycle().record();

    (
        status_for(record.health),
        Json(HealthResponse {
            status: record.health,
            version: env!("CARGO_PKG_VERSION"),
            service: "docconvert-server",
            reason: record.reason,
            quarantined_at: record.quarantined_at,
        }),
    )
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(probe))
        .route("/healthz", get(health_check))
}
