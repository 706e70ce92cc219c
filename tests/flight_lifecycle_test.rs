//! Scenario tests for the detection -> consolidation -> dispatch-key chain,
//! driven the way the poll engine drives it: one detect per tick against the
//! previous snapshot, events buffered until they fire.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use tripwatch::change_consolidation::consolidate;
use tripwatch::change_detection::{ChangeKind, detect};
use tripwatch::flight_status::FlightSnapshot;
use tripwatch::notifications::NotificationType;
use tripwatch::notifier::idempotency_key;
use tripwatch::polling::calculate_next_check_time;

fn snapshot(status: &str, estimated_out: Option<DateTime<Utc>>) -> FlightSnapshot {
    FlightSnapshot {
        ident: "AV112".to_string(),
        status: status.to_string(),
        estimated_out,
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
        origin_iata: Some("EZE".to_string()),
        destination_iata: Some("MDE".to_string()),
        aircraft_type: None,
        raw: None,
    }
}

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 8, h, m, 0).unwrap()
}

/// Walk a snapshot sequence tick by tick, accumulating events the way
/// `PollEngine::process_snapshot` does before consolidation.
fn run_ticks(sequence: &[FlightSnapshot]) -> Vec<tripwatch::change_detection::ChangeEvent> {
    let mut buffer = Vec::new();
    let mut previous: Option<&FlightSnapshot> = None;
    for current in sequence {
        buffer.extend(detect(previous, current));
        previous = Some(current);
    }
    consolidate(&buffer)
}

#[test]
fn estimate_ping_pong_collapses_to_one_delay() {
    // Provider sequence: 02:30 -> null -> 02:30 -> 03:00 -> 03:00
    let sequence = [
        snapshot("Scheduled", Some(at(2, 30))),
        snapshot("Scheduled", None),
        snapshot("Scheduled", Some(at(2, 30))),
        snapshot("Scheduled", Some(at(3, 0))),
        snapshot("Scheduled", Some(at(3, 0))),
    ];

    let surviving = run_ticks(&sequence);
    assert_eq!(surviving.len(), 1, "exactly one net change should survive");

    let event = &surviving[0];
    assert_eq!(event.kind, ChangeKind::DepartureTimeChange);
    assert_eq!(event.notification_type, Some(NotificationType::Delayed));
    assert_eq!(event.old.as_deref(), Some("2025-07-08T02:30:00+00:00"));
    assert_eq!(event.new.as_deref(), Some("2025-07-08T03:00:00+00:00"));
}

#[test]
fn pure_ping_pong_sends_nothing() {
    // 02:30 -> null -> 02:30 with no net movement
    let sequence = [
        snapshot("Scheduled", Some(at(2, 30))),
        snapshot("Scheduled", None),
        snapshot("Scheduled", Some(at(2, 30))),
    ];
    assert!(run_ticks(&sequence).is_empty());
}

#[test]
fn initial_estimate_assignment_stays_quiet() {
    // History row 1 has no estimate; the provider then supplies one.
    let sequence = [
        snapshot("Scheduled", None),
        snapshot("Scheduled", Some(at(19, 30))),
    ];
    assert!(run_ticks(&sequence).is_empty());
}

#[test]
fn gate_change_fires_once_for_repeated_observations() {
    let mut first = snapshot("Scheduled", Some(at(19, 30)));
    first.gate_origin = Some("D16".to_string());
    let mut second = snapshot("Scheduled", Some(at(19, 30)));
    second.gate_origin = Some("D19".to_string());
    let third = second.clone();

    let surviving = run_ticks(&[first, second, third]);
    assert_eq!(surviving.len(), 1);
    assert_eq!(surviving[0].kind, ChangeKind::GateChange);
    assert_eq!(surviving[0].new.as_deref(), Some("D19"));

    // A second identical observation renders the same extra payload, so the
    // idempotency key matches and the ledger suppresses the send.
    let trip_id = uuid::Uuid::new_v4();
    let extra = json!({"new_gate": "D19"});
    assert_eq!(
        idempotency_key(trip_id, NotificationType::GateChange, &extra),
        idempotency_key(trip_id, NotificationType::GateChange, &extra),
    );
}

#[test]
fn idempotency_key_is_stable_across_restarts() {
    // The key must depend only on the canonical payload, never on process
    // state: a restart recomputing it from the same inputs gets the same key.
    let trip_id = uuid::Uuid::parse_str("8a570d1b-f2af-458c-8dbc-3ad58eeb547f").unwrap();
    let key = idempotency_key(
        trip_id,
        NotificationType::Delayed,
        &json!({"new_estimated_out": "2025-07-08T03:00:00+00:00"}),
    );
    assert_eq!(key.len(), 16);
    assert_eq!(
        key,
        idempotency_key(
            trip_id,
            NotificationType::Delayed,
            &json!({"new_estimated_out": "2025-07-08T03:00:00+00:00"}),
        )
    );
}

#[test]
fn arrived_flight_is_terminal_and_stops_polling() {
    let now = at(12, 0);
    let mut landed = snapshot("Arrived", None);
    landed.actual_in = Some(now - Duration::minutes(35));

    assert!(landed.is_terminal());
    assert!(landed.has_landed(now));

    // Twelve hours past departure the calculator stops on its own too.
    let departure = now - Duration::hours(13);
    assert_eq!(calculate_next_check_time(departure, now), None);
}

#[test]
fn fresh_far_future_trip_polls_in_six_hours() {
    let now = at(12, 0);
    let departure = now + Duration::days(30);
    assert_eq!(
        calculate_next_check_time(departure, now),
        Some(now + Duration::hours(6))
    );
}

#[test]
fn delay_needs_threshold_or_status_confirmation() {
    // Drift of 10 minutes under a Scheduled status waits for confirmation.
    let sequence = [
        snapshot("Scheduled", Some(at(2, 30))),
        snapshot("Scheduled", Some(at(2, 40))),
    ];
    assert!(run_ticks(&sequence).is_empty());

    // The same drift with a Delayed status fires both events.
    let sequence = [
        snapshot("Scheduled", Some(at(2, 30))),
        snapshot("Delayed", Some(at(2, 40))),
    ];
    let surviving = run_ticks(&sequence);
    let kinds: Vec<ChangeKind> = surviving.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&ChangeKind::StatusChange));
    assert!(kinds.contains(&ChangeKind::DepartureTimeChange));
}
