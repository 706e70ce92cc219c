//! Airport timezone resolution and local-time formatting.
//!
//! All core computation happens in UTC; airport-local wall time exists only at
//! the edges (trip creation input, message rendering). The IATA table below
//! covers the airports the service books against; anything else falls back to
//! UTC with a warning rather than rejecting the trip.

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use tracing::warn;

static AIRPORT_ZONES: Lazy<HashMap<&'static str, Tz>> = Lazy::new(|| {
    use chrono_tz::*;
    HashMap::from([
        // North America
        ("ATL", America::New_York),
        ("BOS", America::New_York),
        ("DFW", America::Chicago),
        ("DEN", America::Denver),
        ("EWR", America::New_York),
        ("IAD", America::New_York),
        ("IAH", America::Chicago),
        ("JFK", America::New_York),
        ("LAS", America::Los_Angeles),
        ("LAX", America::Los_Angeles),
        ("MCO", America::New_York),
        ("MEX", America::Mexico_City),
        ("MIA", America::New_York),
        ("ORD", America::Chicago),
        ("SEA", America::Los_Angeles),
        ("SFO", America::Los_Angeles),
        ("YUL", America::Toronto),
        ("YYZ", America::Toronto),
        // Central & South America
        ("AEP", America::Argentina::Buenos_Aires),
        ("ASU", America::Asuncion),
        ("BOG", America::Bogota),
        ("BSB", America::Sao_Paulo),
        ("CCS", America::Caracas),
        ("COR", America::Argentina::Cordoba),
        ("CTG", America::Bogota),
        ("CUN", America::Cancun),
        ("EZE", America::Argentina::Buenos_Aires),
        ("GIG", America::Sao_Paulo),
        ("GRU", America::Sao_Paulo),
        ("LIM", America::Lima),
        ("MDE", America::Bogota),
        ("MDZ", America::Argentina::Mendoza),
        ("MVD", America::Montevideo),
        ("PTY", America::Panama),
        ("SCL", America::Santiago),
        ("UIO", America::Guayaquil),
        // Europe
        ("AMS", Europe::Amsterdam),
        ("BCN", Europe::Madrid),
        ("CDG", Europe::Paris),
        ("FCO", Europe::Rome),
        ("FRA", Europe::Berlin),
        ("IST", Europe::Istanbul),
        ("LGW", Europe::London),
        ("LHR", Europe::London),
        ("LIS", Europe::Lisbon),
        ("MAD", Europe::Madrid),
        ("MUC", Europe::Berlin),
        ("MXP", Europe::Rome),
        ("ZRH", Europe::Zurich),
        // Middle East, Africa, Asia-Pacific
        ("AKL", Pacific::Auckland),
        ("BKK", Asia::Bangkok),
        ("DOH", Asia::Qatar),
        ("DXB", Asia::Dubai),
        ("HKG", Asia::Hong_Kong),
        ("HND", Asia::Tokyo),
        ("JNB", Africa::Johannesburg),
        ("NRT", Asia::Tokyo),
        ("SIN", Asia::Singapore),
        ("SYD", Australia::Sydney),
    ])
});

/// Resolve an IATA airport code to its IANA timezone.
/// Unknown codes fall back to UTC so time math stays well-defined.
pub fn airport_tz(iata: &str) -> Tz {
    let code = iata.trim().to_ascii_uppercase();
    match AIRPORT_ZONES.get(code.as_str()) {
        Some(tz) => *tz,
        None => {
            warn!("Unknown airport code {}, falling back to UTC", code);
            Tz::UTC
        }
    }
}

/// Convert a naive airport-local wall time to a UTC instant.
///
/// DST rules: a time inside a spring-forward gap resolves to the first valid
/// instant after the gap (the later reading); an ambiguous fall-back time
/// resolves to the earlier occurrence.
pub fn local_to_utc(local: NaiveDateTime, iata: &str) -> DateTime<Utc> {
    let tz = airport_tz(iata);
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earlier, _later) => earlier.with_timezone(&Utc),
        LocalResult::None => {
            // Spring-forward gap: walk forward in 30-minute steps until the
            // wall clock exists again (gaps are at most a couple of hours).
            let mut candidate = local;
            for _ in 0..6 {
                candidate += Duration::minutes(30);
                match tz.from_local_datetime(&candidate) {
                    LocalResult::Single(dt) => return dt.with_timezone(&Utc),
                    LocalResult::Ambiguous(earlier, _) => return earlier.with_timezone(&Utc),
                    LocalResult::None => continue,
                }
            }
            warn!(
                "Could not resolve local time {} at {}, treating as UTC",
                local, iata
            );
            Utc.from_utc_datetime(&local)
        }
    }
}

/// Convert a UTC instant to the airport's local time.
pub fn utc_to_local(utc: DateTime<Utc>, iata: &str) -> DateTime<Tz> {
    utc.with_timezone(&airport_tz(iata))
}

/// Format a departure for passenger-facing messages: `25/12/2024 10:30`
/// in the airport's local time. Locale-independent by construction.
pub fn format_departure_human(utc: DateTime<Utc>, iata: &str) -> String {
    utc_to_local(utc, iata).format("%d/%m/%Y %H:%M").to_string()
}

/// Format an updated departure estimate for delay messages:
/// `00:00 (03:00 EZE)` — airport-local first, then the UTC reading and the
/// airport code for passengers comparing against booking confirmations.
pub fn format_eta_local(utc: DateTime<Utc>, iata: &str) -> String {
    format!(
        "{} ({} {})",
        utc_to_local(utc, iata).format("%H:%M"),
        utc.format("%H:%M"),
        iata.trim().to_ascii_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn naive(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn lhr_summer_local_converts_to_utc() {
        // BST is UTC+1: 22:05 local is 21:05Z
        let utc = local_to_utc(naive(2025, 7, 8, 22, 5), "LHR");
        assert_eq!(utc.to_rfc3339(), "2025-07-08T21:05:00+00:00");
    }

    #[test]
    fn eze_local_converts_to_utc() {
        // Buenos Aires has no DST, fixed UTC-3
        let utc = local_to_utc(naive(2025, 7, 8, 14, 30), "EZE");
        assert_eq!(utc.to_rfc3339(), "2025-07-08T17:30:00+00:00");
    }

    #[test]
    fn jfk_winter_local_converts_to_utc() {
        // EST is UTC-5: 14:30 local is 19:30Z
        let utc = local_to_utc(naive(2025, 12, 1, 14, 30), "JFK");
        assert_eq!(utc.to_rfc3339(), "2025-12-01T19:30:00+00:00");
    }

    #[test]
    fn local_time_round_trips_through_formatting() {
        let utc = local_to_utc(naive(2025, 7, 8, 22, 5), "LHR");
        assert_eq!(format_departure_human(utc, "LHR"), "08/07/2025 22:05");
    }

    #[test]
    fn unknown_airport_falls_back_to_utc() {
        let utc = local_to_utc(naive(2025, 7, 8, 12, 0), "XXX");
        assert_eq!(utc.to_rfc3339(), "2025-07-08T12:00:00+00:00");
    }

    #[test]
    fn spring_forward_gap_resolves_to_later_instant() {
        // 2025-03-09 02:30 does not exist at JFK; first valid wall time is
        // 03:00 EDT, which is 07:00Z.
        let utc = local_to_utc(naive(2025, 3, 9, 2, 30), "JFK");
        assert_eq!(utc.to_rfc3339(), "2025-03-09T07:00:00+00:00");
    }

    #[test]
    fn fall_back_ambiguity_resolves_to_earlier_instant() {
        // 2025-11-02 01:30 occurs twice at JFK; the earlier is EDT (05:30Z).
        let utc = local_to_utc(naive(2025, 11, 2, 1, 30), "JFK");
        assert_eq!(utc.to_rfc3339(), "2025-11-02T05:30:00+00:00");
    }

    #[test]
    fn eta_format_shows_local_then_utc() {
        let utc = Utc.with_ymd_and_hms(2025, 7, 8, 3, 0, 0).unwrap();
        // EZE is UTC-3: 03:00Z reads 00:00 locally
        assert_eq!(format_eta_local(utc, "EZE"), "00:00 (03:00 EZE)");
    }
}
