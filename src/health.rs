use crate::types::HealthSnapshot;
use crate::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub database: String,
    pub model: String,
    pub upstream: HealthSnapshot,
}

pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { status: "ok" })
}

/// Ready when the transcript store answers. Upstream counters are reported
/// but never fail the check.
pub async fn readiness(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ReadinessResponse>) {
    let db_ok = match sqlx::query("SELECT 1").fetch_one(&state.db).await {
        Ok(_) => true,
        Err(e) => {
            tracing::error!("Readiness check: DB error: {}", e);
            false
        }
    };

    let status_code = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(ReadinessResponse {
            status: if db_ok { "ready" } else { "unready" }.to_string(),
            database: if db_ok { "ok" } else { "error" }.to_string(),
            model: state.config.model.clone(),
            upstream: state.health.snapshot(),
        }),
    )
}
