use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::schema::trips;
use crate::timezones;

static WHATSAPP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\+\d{10,15}$").unwrap()
});

/// A tracked booking for one flight leg, per passenger handle.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = trips)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Trip {
    pub id: Uuid,

    pub client_name: String,

    /// Passenger WhatsApp handle in international format (+5491140383422)
    pub whatsapp: String,

    pub flight_number: String,

    /// Origin airport IATA code (3 letters, upper case)
    pub origin_iata: String,

    /// Destination airport IATA code (3 letters, upper case)
    pub destination_iata: String,

    /// Scheduled departure, always stored as UTC. Input arrives as
    /// airport-local wall time and is converted at construction.
    pub departure_date: DateTime<Utc>,

    /// Current status label as last reported by the provider
    pub status: String,

    /// Current departure gate, if known
    pub gate: Option<String>,

    /// Estimated arrival as last reported by the provider (UTC)
    pub estimated_arrival: Option<DateTime<Utc>>,

    /// Free-text passenger preferences used by itinerary generation
    pub client_description: Option<String>,

    pub agency_id: Option<Uuid>,

    /// Small key-value map; the poller maintains a `flight_data` entry
    pub metadata: Option<serde_json::Value>,

    pub inserted_at: DateTime<Utc>,

    /// Next scheduled poll. NULL once the trip is past its terminal
    /// lifecycle (landed or cancelled, or departure long past).
    pub next_check_at: Option<DateTime<Utc>>,
}

impl Trip {
    /// Day-granularity departure date (UTC) used for provider queries and
    /// the duplicate rule.
    pub fn departure_day(&self) -> chrono::NaiveDate {
        self.departure_date.date_naive()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = trips)]
pub struct NewTrip {
    pub client_name: String,
    pub whatsapp: String,
    pub flight_number: String,
    pub origin_iata: String,
    pub destination_iata: String,
    pub departure_date: DateTime<Utc>,
    pub status: String,
    pub client_description: Option<String>,
    pub agency_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
    pub next_check_at: Option<DateTime<Utc>>,
}

/// Incoming trip payload from the API layer.
///
/// `departure_date` is the airport-local wall time at the origin; validation
/// converts it to UTC so nothing past this boundary ever sees local time.
#[derive(Debug, Clone, Deserialize)]
pub struct TripCreate {
    pub client_name: String,
    pub whatsapp: String,
    pub flight_number: String,
    pub origin_iata: String,
    pub destination_iata: String,
    pub departure_date: NaiveDateTime,
    pub client_description: Option<String>,
    pub agency_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
}

/// Field-level validation failure, surfaced to the API as 422.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

fn invalid(field: &'static str, message: impl Into<String>) -> ValidationError {
    ValidationError {
        field,
        message: message.into(),
    }
}

fn validate_iata(field: &'static str, code: &str) -> Result<String, ValidationError> {
    let code = code.trim().to_ascii_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(invalid(field, "must be a 3-letter IATA airport code"));
    }
    Ok(code)
}

/// Strip separators from a phone handle and require international format.
pub fn normalize_whatsapp(raw: &str) -> Result<String, ValidationError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();
    if !WHATSAPP_RE.is_match(&cleaned) {
        return Err(invalid(
            "whatsapp",
            "must be in international format (+1234567890)",
        ));
    }
    Ok(cleaned)
}

impl TripCreate {
    /// Validate the payload and produce an insertable trip with the
    /// departure converted from airport-local time to UTC.
    pub fn into_new_trip(self) -> Result<NewTrip, ValidationError> {
        let client_name = self.client_name.trim().to_string();
        if client_name.is_empty() || client_name.len() > 100 {
            return Err(invalid("client_name", "must be 1-100 characters"));
        }

        let whatsapp = normalize_whatsapp(&self.whatsapp)?;

        let flight_number = self.flight_number.trim().to_ascii_uppercase();
        if flight_number.len() < 3 || flight_number.len() > 10 {
            return Err(invalid("flight_number", "must be 3-10 characters"));
        }

        let origin_iata = validate_iata("origin_iata", &self.origin_iata)?;
        let destination_iata = validate_iata("destination_iata", &self.destination_iata)?;

        let departure_date = timezones::local_to_utc(self.departure_date, &origin_iata);

        Ok(NewTrip {
            client_name,
            whatsapp,
            flight_number,
            origin_iata,
            destination_iata,
            departure_date,
            status: "SCHEDULED".to_string(),
            client_description: self.client_description,
            agency_id: self.agency_id,
            metadata: self.metadata,
            next_check_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn payload() -> TripCreate {
        TripCreate {
            client_name: "Vale Ulloa".to_string(),
            whatsapp: "+54 911 4038-3422".to_string(),
            flight_number: "aa123".to_string(),
            origin_iata: "jfk".to_string(),
            destination_iata: "LAX".to_string(),
            departure_date: NaiveDate::from_ymd_opt(2025, 12, 1)
                .unwrap()
                .and_hms_opt(14, 30, 0)
                .unwrap(),
            client_description: None,
            agency_id: None,
            metadata: None,
        }
    }

    #[test]
    fn departure_is_stored_as_utc() {
        // JFK 14:30 local in December (EST, UTC-5) is 19:30Z
        let new_trip = payload().into_new_trip().unwrap();
        assert_eq!(
            new_trip.departure_date.to_rfc3339(),
            "2025-12-01T19:30:00+00:00"
        );
    }

    #[test]
    fn fields_are_normalized() {
        let new_trip = payload().into_new_trip().unwrap();
        assert_eq!(new_trip.whatsapp, "+5491140383422");
        assert_eq!(new_trip.flight_number, "AA123");
        assert_eq!(new_trip.origin_iata, "JFK");
    }

    #[test]
    fn bad_phone_is_rejected() {
        let mut p = payload();
        p.whatsapp = "12345".to_string();
        let err = p.into_new_trip().unwrap_err();
        assert_eq!(err.field, "whatsapp");
    }

    #[test]
    fn bad_airport_code_is_rejected() {
        let mut p = payload();
        p.origin_iata = "NEWYORK".to_string();
        let err = p.into_new_trip().unwrap_err();
        assert_eq!(err.field, "origin_iata");
    }

    #[test]
    fn phone_separators_are_stripped() {
        assert_eq!(
            normalize_whatsapp("+1 (361) 309-4264").unwrap(),
            "+13613094264"
        );
    }
}
