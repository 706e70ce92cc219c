use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::itineraries;

/// A versioned itinerary draft for a trip.
///
/// The generator itself is an external collaborator; this service only owns
/// the rows and the READY notification. Status moves draft -> approved, or
/// back through regenerating when a new version is requested.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = itineraries)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ItineraryRow {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub version: i32,
    pub status: String,
    pub parsed_itinerary: serde_json::Value,
    pub raw_prompt: Option<String>,
    pub raw_response: Option<String>,
    pub generated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = itineraries)]
pub struct NewItinerary {
    pub trip_id: Uuid,
    pub version: i32,
    pub status: String,
    pub parsed_itinerary: serde_json::Value,
    pub raw_prompt: Option<String>,
    pub raw_response: Option<String>,
    pub generated_at: Option<DateTime<Utc>>,
}
