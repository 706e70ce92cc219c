//! Snapshot-to-snapshot change detection.
//!
//! Compares the latest history row with a freshly fetched snapshot and emits
//! the transitions worth communicating. The thresholds here are the first
//! line of defense against provider noise; the consolidator
//! (`change_consolidation`) handles flapping across multiple polls.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::flight_status::FlightSnapshot;
use crate::notifications::NotificationType;

/// Minimum forward movement of `estimated_out` to count as a delay when the
/// provider already reports a Delayed status.
const DELAY_CONFIRMED_THRESHOLD_MIN: i64 = 5;
/// Forward movement that counts as a delay regardless of status.
const DELAY_UNCONDITIONAL_THRESHOLD_MIN: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    StatusChange,
    GateChange,
    DepartureTimeChange,
    Cancellation,
    Diversion,
}

/// A typed transition between two observed snapshots.
///
/// `old`/`new` are the string forms used for consolidation and rendering:
/// RFC 3339 for times, verbatim labels for statuses and gates. `None` models
/// a field the provider dropped or had not supplied yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub old: Option<String>,
    pub new: Option<String>,
    /// Message kind this event should dispatch as; `None` for transitions
    /// that are recorded but have no registered template (diversions).
    pub notification_type: Option<NotificationType>,
}

/// Map a provider status label onto the notification taxonomy.
/// Labels outside the known set are logged and treated as quiet.
pub fn map_status(status: &str) -> Option<NotificationType> {
    match status.trim().to_ascii_lowercase().as_str() {
        "scheduled" | "on time" | "taxiing" | "pushback" | "unknown" | "en route" | "arrived" => {
            None
        }
        "delayed" => Some(NotificationType::Delayed),
        "cancelled" => Some(NotificationType::Cancelled),
        "boarding" => Some(NotificationType::Boarding),
        other => {
            warn!("Unrecognized flight status token: {:?}", other);
            None
        }
    }
}

/// Whether a movement of `estimated_out` is a real delay rather than an
/// initial estimate, an early departure, or minor drift.
pub fn is_actual_delay(
    previous: Option<DateTime<Utc>>,
    current: Option<DateTime<Utc>>,
    current_status: &str,
) -> bool {
    let (Some(previous), Some(current)) = (previous, current) else {
        return false;
    };
    if current <= previous {
        return false;
    }

    let delta_minutes = (current - previous).num_minutes();
    if map_status(current_status) == Some(NotificationType::Delayed)
        && delta_minutes >= DELAY_CONFIRMED_THRESHOLD_MIN
    {
        return true;
    }
    delta_minutes >= DELAY_UNCONDITIONAL_THRESHOLD_MIN
}

/// Detect communicable transitions between the previous and current
/// snapshot. The first observation of a flight is the baseline and never
/// produces events.
pub fn detect(previous: Option<&FlightSnapshot>, current: &FlightSnapshot) -> Vec<ChangeEvent> {
    let Some(previous) = previous else {
        return Vec::new();
    };

    let mut events = Vec::new();

    // Status transition, only when the new status maps to a message kind and
    // the mapping actually changed (Scheduled -> On Time stays quiet).
    let current_mapping = map_status(&current.status);
    if let Some(notification) = current_mapping
        && current_mapping != map_status(&previous.status)
    {
        events.push(ChangeEvent {
            kind: ChangeKind::StatusChange,
            old: Some(previous.status.clone()),
            new: Some(current.status.clone()),
            notification_type: Some(notification),
        });
    }

    // Origin gate movement. Null-to-value and value-to-null are provider
    // flapping, not reassignments.
    if let (Some(old_gate), Some(new_gate)) = (&previous.gate_origin, &current.gate_origin)
        && old_gate != new_gate
    {
        events.push(ChangeEvent {
            kind: ChangeKind::GateChange,
            old: Some(old_gate.clone()),
            new: Some(new_gate.clone()),
            notification_type: Some(NotificationType::GateChange),
        });
    }

    if is_actual_delay(previous.estimated_out, current.estimated_out, &current.status) {
        events.push(ChangeEvent {
            kind: ChangeKind::DepartureTimeChange,
            old: previous.estimated_out.map(|t| t.to_rfc3339()),
            new: current.estimated_out.map(|t| t.to_rfc3339()),
            notification_type: Some(NotificationType::Delayed),
        });
    }

    // The cancelled flag bypasses all thresholds. When the status label also
    // flipped to Cancelled the status event above already carries the
    // message; this covers flag-only cancellations.
    if current.cancelled
        && !previous.cancelled
        && current_mapping != Some(NotificationType::Cancelled)
    {
        events.push(ChangeEvent {
            kind: ChangeKind::Cancellation,
            old: Some(previous.status.clone()),
            new: Some(current.status.clone()),
            notification_type: Some(NotificationType::Cancelled),
        });
    }

    // Diversions are recorded but have no registered template.
    if current.diverted && !previous.diverted {
        events.push(ChangeEvent {
            kind: ChangeKind::Diversion,
            old: previous.destination_iata.clone(),
            new: current.destination_iata.clone(),
            notification_type: None,
        });
    }

    events
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

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 8, h, m, 0).unwrap()
    }

    #[test]
    fn status_mapping_closed_set() {
        assert_eq!(map_status("Scheduled"), None);
        assert_eq!(map_status("On Time"), None);
        assert_eq!(map_status("Taxiing"), None);
        assert_eq!(map_status("Pushback"), None);
        assert_eq!(map_status("Unknown"), None);
        assert_eq!(map_status("En Route"), None);
        assert_eq!(map_status("Arrived"), None);
        assert_eq!(map_status("Delayed"), Some(NotificationType::Delayed));
        assert_eq!(map_status("Cancelled"), Some(NotificationType::Cancelled));
        assert_eq!(map_status("Boarding"), Some(NotificationType::Boarding));
        assert_eq!(map_status("WeirdUnknownStatus123"), None);
    }

    #[test]
    fn status_mapping_is_case_insensitive() {
        assert_eq!(map_status("SCHEDULED"), None);
        assert_eq!(map_status("delayed"), Some(NotificationType::Delayed));
        assert_eq!(map_status("CaNcElLeD"), Some(NotificationType::Cancelled));
    }

    #[test]
    fn first_observation_is_baseline() {
        let current = snapshot("Delayed");
        assert!(detect(None, &current).is_empty());
    }

    #[test]
    fn identical_snapshots_produce_no_events() {
        let s = snapshot("Scheduled");
        assert!(detect(Some(&s), &s.clone()).is_empty());
    }

    #[test]
    fn scheduled_to_delayed_emits_status_change() {
        let previous = snapshot("Scheduled");
        let current = snapshot("Delayed");
        let events = detect(Some(&previous), &current);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::StatusChange);
        assert_eq!(
            events[0].notification_type,
            Some(NotificationType::Delayed)
        );
    }

    #[test]
    fn unknown_to_scheduled_is_quiet() {
        let previous = snapshot("Unknown");
        let current = snapshot("Scheduled");
        assert!(detect(Some(&previous), &current).is_empty());
    }

    #[test]
    fn initial_estimate_assignment_is_not_a_delay() {
        let previous = snapshot("Scheduled");
        let mut current = snapshot("Scheduled");
        current.estimated_out = Some(at(19, 30));
        assert!(detect(Some(&previous), &current).is_empty());
    }

    #[test]
    fn early_departure_is_not_a_delay() {
        assert!(!is_actual_delay(
            Some(at(2, 30)),
            Some(at(2, 15)),
            "Scheduled"
        ));
    }

    #[test]
    fn delay_thresholds_with_delayed_status() {
        // 4 minutes: below the confirmed threshold
        assert!(!is_actual_delay(Some(at(2, 30)), Some(at(2, 34)), "Delayed"));
        // 5 minutes: at the confirmed threshold
        assert!(is_actual_delay(Some(at(2, 30)), Some(at(2, 35)), "Delayed"));
    }

    #[test]
    fn delay_thresholds_without_status_confirmation() {
        // 14 minutes of drift waits for confirmation
        assert!(!is_actual_delay(
            Some(at(2, 30)),
            Some(at(2, 44)),
            "Scheduled"
        ));
        // 15 minutes triggers regardless of status
        assert!(is_actual_delay(
            Some(at(2, 30)),
            Some(at(2, 45)),
            "Scheduled"
        ));
    }

    #[test]
    fn real_delay_emits_status_and_time_events() {
        let mut previous = snapshot("Scheduled");
        previous.estimated_out = Some(at(2, 30));
        let mut current = snapshot("Delayed");
        current.estimated_out = Some(at(2, 45));

        let events = detect(Some(&previous), &current);
        let kinds: Vec<ChangeKind> = events.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&ChangeKind::StatusChange));
        assert!(kinds.contains(&ChangeKind::DepartureTimeChange));
        assert!(
            events
                .iter()
                .all(|e| e.notification_type == Some(NotificationType::Delayed))
        );
    }

    #[test]
    fn gate_change_requires_both_sides() {
        let mut previous = snapshot("Scheduled");
        let mut current = snapshot("Scheduled");

        previous.gate_origin = Some("D16".to_string());
        current.gate_origin = Some("D19".to_string());
        let events = detect(Some(&previous), &current);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::GateChange);
        assert_eq!(events[0].new.as_deref(), Some("D19"));

        // null -> value is suppressed
        previous.gate_origin = None;
        assert!(detect(Some(&previous), &current).is_empty());

        // value -> null is suppressed
        previous.gate_origin = Some("D16".to_string());
        current.gate_origin = None;
        assert!(detect(Some(&previous), &current).is_empty());
    }

    #[test]
    fn cancellation_flag_bypasses_thresholds() {
        let previous = snapshot("Scheduled");
        let mut current = snapshot("Scheduled");
        current.cancelled = true;

        let events = detect(Some(&previous), &current);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Cancellation);
        assert_eq!(
            events[0].notification_type,
            Some(NotificationType::Cancelled)
        );
    }

    #[test]
    fn cancelled_status_and_flag_emit_a_single_message() {
        let previous = snapshot("Scheduled");
        let mut current = snapshot("Cancelled");
        current.cancelled = true;

        let events = detect(Some(&previous), &current);
        let cancelled: Vec<_> = events
            .iter()
            .filter(|e| e.notification_type == Some(NotificationType::Cancelled))
            .collect();
        assert_eq!(cancelled.len(), 1);
    }

    #[test]
    fn diversion_is_recorded_without_a_message() {
        let mut previous = snapshot("En Route");
        previous.destination_iata = Some("LAX".to_string());
        let mut current = snapshot("En Route");
        current.diverted = true;
        current.destination_iata = Some("LAS".to_string());

        let events = detect(Some(&previous), &current);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Diversion);
        assert_eq!(events[0].notification_type, None);
    }
}
