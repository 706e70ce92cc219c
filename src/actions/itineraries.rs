use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::itineraries_repo::ItinerariesRepository;
use crate::trips_repo::TripsRepository;
use crate::web::AppState;

use super::json_error;

#[derive(Debug, Deserialize)]
pub struct GenerateItineraryPayload {
    pub trip_id: Uuid,
}

pub async fn generate_itinerary(
    State(state): State<AppState>,
    Json(payload): Json<GenerateItineraryPayload>,
) -> impl IntoResponse {
    let trips = TripsRepository::new(state.pool.clone());
    match trips.get_by_id(payload.trip_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return json_error(StatusCode::NOT_FOUND, "Trip not found").into_response(),
        Err(e) => {
            error!("Trip lookup failed: {:#}", e);
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Trip lookup failed")
                .into_response();
        }
    }

    state.orchestrator.enqueue_itinerary(payload.trip_id);

    (
        StatusCode::CREATED,
        Json(json!({
            "trip_id": payload.trip_id,
            "status": "generation_enqueued",
        })),
    )
        .into_response()
}

pub async fn get_itinerary(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
) -> impl IntoResponse {
    let repo = ItinerariesRepository::new(state.pool.clone());
    match repo.latest(trip_id).await {
        Ok(Some(itinerary)) => Json(itinerary).into_response(),
        Ok(None) => json_error(
            StatusCode::NOT_FOUND,
            &format!("No itinerary found for trip {}", trip_id),
        )
        .into_response(),
        Err(e) => {
            error!("Itinerary lookup for trip {} failed: {:#}", trip_id, e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Itinerary lookup failed")
                .into_response()
        }
    }
}
