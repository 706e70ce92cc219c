use axum::{
    extract::State,
    response::{IntoResponse, Json},
};
use serde_json::json;

use crate::web::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db = state.pool.state();

    Json(json!({
        "status": "ok",
        "database": {
            "connections": db.connections,
            "idle_connections": db.idle_connections,
        },
        "flight_data_configured": std::env::var("AERO_API_KEY").map(|v| !v.is_empty()).unwrap_or(false),
        "messaging_configured": std::env::var("TWILIO_ACCOUNT_SID").map(|v| !v.is_empty()).unwrap_or(false),
    }))
}

pub async fn scheduler_status(State(state): State<AppState>) -> impl IntoResponse {
    let jobs = state.orchestrator.scheduled_job_ids();
    Json(json!({
        "status": "running",
        "one_shot_jobs_count": jobs.len(),
        "one_shot_jobs": jobs,
    }))
}

pub async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.flight_data().cache_stats())
}
