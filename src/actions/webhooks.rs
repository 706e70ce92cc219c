use axum::{
    extract::{Form, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::conversations_repo::ConversationsRepository;
use crate::trips::Trip;
use crate::web::AppState;

use super::json_error;

/// Database-change webhook payload fired on trip inserts.
#[derive(Debug, Deserialize)]
pub struct TripInsertPayload {
    #[serde(rename = "type")]
    pub change_type: String,
    pub table: String,
    pub record: serde_json::Value,
}

/// Triggered when a trip row is inserted outside the API (imports, admin
/// tooling). Runs the same post-create path as `POST /trips`; the
/// confirmation's idempotency key makes the overlap harmless.
pub async fn trip_confirmation_webhook(
    State(state): State<AppState>,
    Json(payload): Json<TripInsertPayload>,
) -> impl IntoResponse {
    if payload.change_type != "INSERT" || payload.table != "trips" {
        warn!(
            "Ignoring webhook for {} on {}",
            payload.change_type, payload.table
        );
        return json_error(StatusCode::BAD_REQUEST, "Invalid webhook payload").into_response();
    }

    let trip: Trip = match serde_json::from_value(payload.record) {
        Ok(trip) => trip,
        Err(e) => {
            error!("Webhook trip record failed to parse: {}", e);
            return json_error(StatusCode::BAD_REQUEST, "Unparseable trip record")
                .into_response();
        }
    };

    info!(
        "Trip-confirmation webhook for trip {} ({})",
        trip.id, trip.flight_number
    );

    match state.orchestrator.on_trip_created(&trip).await {
        Ok(_) => Json(json!({
            "success": true,
            "trip_id": trip.id,
        }))
        .into_response(),
        Err(e) => {
            error!("Webhook orchestration for trip {} failed: {:#}", trip.id, e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Webhook processing failed")
                .into_response()
        }
    }
}

/// Inbound WhatsApp message forwarded by the messaging provider.
#[derive(Debug, Deserialize)]
pub struct TwilioInboundMessage {
    #[serde(rename = "MessageSid")]
    pub message_sid: String,
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "To")]
    pub to: String,
    #[serde(rename = "Body")]
    pub body: String,
}

fn normalize_phone(phone: &str) -> &str {
    phone.strip_prefix("whatsapp:").unwrap_or(phone)
}

/// Record an inbound passenger message. The conversational assistant that
/// replies is a separate system; acknowledging here keeps the provider from
/// retrying.
pub async fn twilio_webhook(
    State(state): State<AppState>,
    Form(message): Form<TwilioInboundMessage>,
) -> impl IntoResponse {
    let from = normalize_phone(&message.from);
    info!("Inbound WhatsApp message from {}", from);

    let repo = ConversationsRepository::new(state.pool.clone());
    match repo
        .record_inbound(from, &message.body, Some(&message.message_sid))
        .await
    {
        Ok(_) => Json(json!({"success": true})).into_response(),
        Err(e) => {
            error!("Failed to record inbound message: {:#}", e);
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to record message",
            )
            .into_response()
        }
    }
}
