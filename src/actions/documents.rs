use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::documents::NewDocument;
use crate::documents_repo::DocumentsRepository;
use crate::trips_repo::TripsRepository;
use crate::web::AppState;

use super::json_error;

pub async fn upload_document(
    State(state): State<AppState>,
    Json(payload): Json<NewDocument>,
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

    let repo = DocumentsRepository::new(state.pool.clone());
    match repo.create(payload).await {
        Ok(document) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "document_id": document.id,
                "trip_id": document.trip_id,
            })),
        )
            .into_response(),
        Err(e) => {
            error!("Document upload failed: {:#}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to upload document")
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DocumentsQuery {
    pub document_type: Option<String>,
}

pub async fn get_trip_documents(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
    Query(query): Query<DocumentsQuery>,
) -> impl IntoResponse {
    let trips = TripsRepository::new(state.pool.clone());
    match trips.get_by_id(trip_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return json_error(StatusCode::NOT_FOUND, "Trip not found").into_response(),
        Err(e) => {
            error!("Trip lookup failed: {:#}", e);
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Trip lookup failed")
                .into_response();
        }
    }

    let repo = DocumentsRepository::new(state.pool.clone());
    match repo.for_trip(trip_id, query.document_type).await {
        Ok(documents) => Json(json!({
            "trip_id": trip_id,
            "count": documents.len(),
            "documents": documents,
        }))
        .into_response(),
        Err(e) => {
            error!("Document listing for trip {} failed: {:#}", trip_id, e);
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to retrieve documents",
            )
            .into_response()
        }
    }
}
