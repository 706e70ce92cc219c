use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::notifications_log;

/// The closed set of outbound message kinds.
///
/// Stored in `notifications_log` as the canonical uppercase token, which is
/// also what the idempotency key is computed over — the representation must
/// stay stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    ReservationConfirmation,
    #[serde(rename = "REMINDER_24H")]
    Reminder24h,
    Delayed,
    GateChange,
    Cancelled,
    Boarding,
    LandingWelcome,
    ItineraryReady,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::ReservationConfirmation => "RESERVATION_CONFIRMATION",
            NotificationType::Reminder24h => "REMINDER_24H",
            NotificationType::Delayed => "DELAYED",
            NotificationType::GateChange => "GATE_CHANGE",
            NotificationType::Cancelled => "CANCELLED",
            NotificationType::Boarding => "BOARDING",
            NotificationType::LandingWelcome => "LANDING_WELCOME",
            NotificationType::ItineraryReady => "ITINERARY_READY",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "RESERVATION_CONFIRMATION" => Some(NotificationType::ReservationConfirmation),
            "REMINDER_24H" => Some(NotificationType::Reminder24h),
            "DELAYED" => Some(NotificationType::Delayed),
            "GATE_CHANGE" => Some(NotificationType::GateChange),
            "CANCELLED" => Some(NotificationType::Cancelled),
            "BOARDING" => Some(NotificationType::Boarding),
            "LANDING_WELCOME" => Some(NotificationType::LandingWelcome),
            "ITINERARY_READY" => Some(NotificationType::ItineraryReady),
            _ => None,
        }
    }

    /// Stable template identifier registered with the messaging provider.
    pub fn template_name(&self) -> &'static str {
        match self {
            NotificationType::ReservationConfirmation => "confirmacion_reserva",
            NotificationType::Reminder24h => "recordatorio_24h",
            NotificationType::Delayed => "demora_vuelo",
            NotificationType::GateChange => "cambio_gate",
            NotificationType::Cancelled => "vuelo_cancelado",
            NotificationType::Boarding => "embarque",
            NotificationType::LandingWelcome => "landing_welcome_es",
            NotificationType::ItineraryReady => "itinerario_listo",
        }
    }

    /// Environment variable carrying the provider content SID override for
    /// this template. Falls back to the template name when unset, which is
    /// enough for sandbox accounts.
    pub fn content_sid_env(&self) -> &'static str {
        match self {
            NotificationType::ReservationConfirmation => "TW_TEMPLATE_RESERVATION_CONFIRMATION_SID",
            NotificationType::Reminder24h => "TW_TEMPLATE_REMINDER_24H_SID",
            NotificationType::Delayed => "TW_TEMPLATE_DELAYED_SID",
            NotificationType::GateChange => "TW_TEMPLATE_GATE_CHANGE_SID",
            NotificationType::Cancelled => "TW_TEMPLATE_CANCELLED_SID",
            NotificationType::Boarding => "TW_TEMPLATE_BOARDING_SID",
            NotificationType::LandingWelcome => "TW_TEMPLATE_LANDING_WELCOME_SID",
            NotificationType::ItineraryReady => "TW_TEMPLATE_ITINERARY_READY_SID",
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery state of one logged notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[db_enum(existing_type_path = "crate::schema::sql_types::DeliveryStatus")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

/// One row of the exactly-once notification ledger.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = notifications_log)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NotificationLogRow {
    pub id: Uuid,
    pub trip_id: Uuid,

    /// Canonical uppercase token, see [`NotificationType::as_str`]
    pub notification_type: String,

    pub template_name: String,
    pub delivery_status: DeliveryStatus,

    /// First 16 hex chars of the canonical payload digest; unique per trip
    pub idempotency_key: String,

    /// The `extra` input the notification was rendered from, kept so the
    /// retry service can re-render after a restart
    pub extra_data: Option<serde_json::Value>,

    pub twilio_message_sid: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationLogRow {
    pub fn notification_type(&self) -> Option<NotificationType> {
        NotificationType::parse(&self.notification_type)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = notifications_log)]
pub struct NewNotificationLogRow {
    pub trip_id: Uuid,
    pub notification_type: String,
    pub template_name: String,
    pub delivery_status: DeliveryStatus,
    pub idempotency_key: String,
    pub extra_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tokens_round_trip() {
        let all = [
            NotificationType::ReservationConfirmation,
            NotificationType::Reminder24h,
            NotificationType::Delayed,
            NotificationType::GateChange,
            NotificationType::Cancelled,
            NotificationType::Boarding,
            NotificationType::LandingWelcome,
            NotificationType::ItineraryReady,
        ];
        for t in all {
            assert_eq!(NotificationType::parse(t.as_str()), Some(t));
        }
        assert_eq!(NotificationType::parse("SOMETHING_ELSE"), None);
    }

    #[test]
    fn serde_uses_canonical_tokens() {
        let json = serde_json::to_string(&NotificationType::Reminder24h).unwrap();
        assert_eq!(json, "\"REMINDER_24H\"");
        let json = serde_json::to_string(&NotificationType::GateChange).unwrap();
        assert_eq!(json, "\"GATE_CHANGE\"");
    }
}
