use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::flight_status_history;

/// Canonical, normalized view of a flight's state at one instant.
///
/// Every provider response is reduced to this shape at the client boundary;
/// the raw payload rides along for forensics and is persisted with each
/// history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightSnapshot {
    /// Flight identifier as reported by the provider (e.g. "AA123")
    pub ident: String,

    /// Status label from the provider's closed set ("Scheduled", "Delayed",
    /// "Boarding", "En Route", "Arrived", ...)
    pub status: String,

    /// Estimated gate departure (UTC)
    pub estimated_out: Option<DateTime<Utc>>,

    /// Actual gate departure (UTC)
    pub actual_out: Option<DateTime<Utc>>,

    /// Estimated gate arrival (UTC) — provider field `estimated_on`
    pub estimated_in: Option<DateTime<Utc>>,

    /// Actual gate arrival (UTC) — provider field `actual_on`
    pub actual_in: Option<DateTime<Utc>>,

    /// Departure gate at the origin airport
    pub gate_origin: Option<String>,

    /// Arrival gate at the destination airport
    pub gate_destination: Option<String>,

    pub departure_delay_minutes: i32,
    pub arrival_delay_minutes: i32,

    pub cancelled: bool,
    pub diverted: bool,

    /// Flight progress 0..=100
    pub progress_percent: i32,

    pub origin_iata: Option<String>,
    pub destination_iata: Option<String>,
    pub aircraft_type: Option<String>,

    /// Raw provider payload for this flight, retained verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl FlightSnapshot {
    /// Terminal snapshots stop the polling loop for their trip.
    pub fn is_terminal(&self) -> bool {
        self.cancelled || matches!(self.status.as_str(), "Arrived" | "Cancelled")
    }

    /// Landing heuristic used by the welcome sweep: an explicit Arrived
    /// status, full progress, or an actual arrival older than 30 minutes.
    pub fn has_landed(&self, now: DateTime<Utc>) -> bool {
        if self.status == "Arrived" || self.progress_percent >= 100 {
            return true;
        }
        match self.actual_in {
            Some(actual_in) => now - actual_in > Duration::minutes(30),
            None => false,
        }
    }
}

/// One append-only row of the flight status history for a trip.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = flight_status_history)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FlightStatusHistoryRow {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub flight_number: String,
    pub status: String,
    pub estimated_out: Option<DateTime<Utc>>,
    pub actual_out: Option<DateTime<Utc>>,
    pub estimated_in: Option<DateTime<Utc>>,
    pub actual_in: Option<DateTime<Utc>>,
    pub gate_origin: Option<String>,
    pub gate_destination: Option<String>,
    pub departure_delay_minutes: i32,
    pub arrival_delay_minutes: i32,
    pub cancelled: bool,
    pub diverted: bool,
    pub progress_percent: i32,
    pub origin_iata: Option<String>,
    pub destination_iata: Option<String>,
    pub aircraft_type: Option<String>,
    pub raw_data: Option<serde_json::Value>,
}

impl FlightStatusHistoryRow {
    /// Rehydrate the canonical snapshot this row was recorded from.
    pub fn to_snapshot(&self) -> FlightSnapshot {
        FlightSnapshot {
            ident: self.flight_number.clone(),
            status: self.status.clone(),
            estimated_out: self.estimated_out,
            actual_out: self.actual_out,
            estimated_in: self.estimated_in,
            actual_in: self.actual_in,
            gate_origin: self.gate_origin.clone(),
            gate_destination: self.gate_destination.clone(),
            departure_delay_minutes: self.departure_delay_minutes,
            arrival_delay_minutes: self.arrival_delay_minutes,
            cancelled: self.cancelled,
            diverted: self.diverted,
            progress_percent: self.progress_percent,
            origin_iata: self.origin_iata.clone(),
            destination_iata: self.destination_iata.clone(),
            aircraft_type: self.aircraft_type.clone(),
            raw: self.raw_data.clone(),
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = flight_status_history)]
pub struct NewFlightStatusHistoryRow {
    pub trip_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub flight_number: String,
    pub status: String,
    pub estimated_out: Option<DateTime<Utc>>,
    pub actual_out: Option<DateTime<Utc>>,
    pub estimated_in: Option<DateTime<Utc>>,
    pub actual_in: Option<DateTime<Utc>>,
    pub gate_origin: Option<String>,
    pub gate_destination: Option<String>,
    pub departure_delay_minutes: i32,
    pub arrival_delay_minutes: i32,
    pub cancelled: bool,
    pub diverted: bool,
    pub progress_percent: i32,
    pub origin_iata: Option<String>,
    pub destination_iata: Option<String>,
    pub aircraft_type: Option<String>,
    pub raw_data: Option<serde_json::Value>,
}

impl NewFlightStatusHistoryRow {
    pub fn from_snapshot(trip_id: Uuid, recorded_at: DateTime<Utc>, s: &FlightSnapshot) -> Self {
        Self {
            trip_id,
            recorded_at,
            flight_number: s.ident.clone(),
            status: s.status.clone(),
            estimated_out: s.estimated_out,
            actual_out: s.actual_out,
            estimated_in: s.estimated_in,
            actual_in: s.actual_in,
            gate_origin: s.gate_origin.clone(),
            gate_destination: s.gate_destination.clone(),
            departure_delay_minutes: s.departure_delay_minutes,
            arrival_delay_minutes: s.arrival_delay_minutes,
            cancelled: s.cancelled,
            diverted: s.diverted,
            progress_percent: s.progress_percent,
            origin_iata: s.origin_iata.clone(),
            destination_iata: s.destination_iata.clone(),
            aircraft_type: s.aircraft_type.clone(),
            raw_data: s.raw.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(status: &str) -> FlightSnapshot {
        FlightSnapshot {
            ident: "AA123".to_string(),
            status: status.to_string(),
            estimated_out: None,
            actual_out: None,
            estimated_in: None,
            actual_in: None,
            gate_origin: None,
            gate_destination: None,
            departure_delay_minutes: 0,
            arrival_delay_minutes: 0,
            cancelled: false,
            diverted: false,
            progress_percent: 0,
            origin_iata: None,
            destination_iata: None,
            aircraft_type: None,
            raw: None,
        }
    }

    #[test]
    fn arrived_and_cancelled_are_terminal() {
        assert!(snapshot("Arrived").is_terminal());
        assert!(snapshot("Cancelled").is_terminal());
        assert!(!snapshot("Scheduled").is_terminal());

        let mut s = snapshot("En Route");
        s.cancelled = true;
        assert!(s.is_terminal());
    }

    #[test]
    fn landing_detected_by_status_progress_or_actual_in() {
        let now = Utc.with_ymd_and_hms(2025, 7, 8, 12, 0, 0).unwrap();

        assert!(snapshot("Arrived").has_landed(now));

        let mut by_progress = snapshot("En Route");
        by_progress.progress_percent = 100;
        assert!(by_progress.has_landed(now));

        let mut by_actual_in = snapshot("En Route");
        by_actual_in.actual_in = Some(now - Duration::minutes(35));
        assert!(by_actual_in.has_landed(now));

        let mut too_recent = snapshot("En Route");
        too_recent.actual_in = Some(now - Duration::minutes(10));
        assert!(!too_recent.has_landed(now));
    }
}
