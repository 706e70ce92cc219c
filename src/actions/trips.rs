use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;
use tracing::{error, info};

use crate::trips::TripCreate;
use crate::trips_repo::{CreateTripError, TripsRepository};
use crate::web::AppState;

use super::json_error;

pub async fn create_trip(
    State(state): State<AppState>,
    Json(payload): Json<TripCreate>,
) -> impl IntoResponse {
    info!(
        "Trip creation requested for flight {} ({})",
        payload.flight_number, payload.whatsapp
    );

    let new_trip = match payload.into_new_trip() {
        Ok(new_trip) => new_trip,
        Err(e) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "errors": e.message,
                    "field": e.field,
                })),
            )
                .into_response();
        }
    };

    let repo = TripsRepository::new(state.pool.clone());
    let trip = match repo.create(new_trip).await {
        Ok(trip) => trip,
        Err(CreateTripError::Duplicate) => {
            return json_error(
                StatusCode::CONFLICT,
                "Trip already exists for this flight and passenger",
            )
            .into_response();
        }
        Err(CreateTripError::Database(e)) => {
            error!("Trip creation failed: {:#}", e);
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create trip")
                .into_response();
        }
    };

    // Confirmation, one-shot jobs and the first poll slot. Failures here are
    // logged and retried downstream; the trip itself is already durable.
    let next_check_at = match state.orchestrator.on_trip_created(&trip).await {
        Ok(next) => next,
        Err(e) => {
            error!("Post-create orchestration for trip {} failed: {:#}", trip.id, e);
            None
        }
    };

    (
        StatusCode::CREATED,
        Json(json!({
            "trip_id": trip.id,
            "status": "confirmation_sent",
            "next_check_at": next_check_at,
        })),
    )
        .into_response()
}
