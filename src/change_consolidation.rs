//! Collapse buffered change events before dispatch.
//!
//! The provider flaps: an estimate disappears, reappears, then finally moves.
//! Events accumulate per trip until they fire, and this pass reduces each
//! kind's chain to its net transition — `A→B→A` vanishes, `A→B→C` becomes
//! `A→C` — so the passenger sees one message describing the real change.

use crate::change_detection::{ChangeEvent, ChangeKind};

/// Reduce a buffered event sequence to at most one event per kind.
///
/// Within a kind the events form a chain in arrival order. The surviving
/// event spans the chain's first origin and last target, with concrete
/// values preferred over nulls on both ends. A chain whose net movement is
/// zero is dropped entirely.
pub fn consolidate(events: &[ChangeEvent]) -> Vec<ChangeEvent> {
    let mut out: Vec<ChangeEvent> = Vec::new();
    let mut seen_kinds: Vec<ChangeKind> = Vec::new();

    for event in events {
        if seen_kinds.contains(&event.kind) {
            continue;
        }
        seen_kinds.push(event.kind);

        let chain: Vec<&ChangeEvent> = events.iter().filter(|e| e.kind == event.kind).collect();

        // Net origin: the chain's first value, unless it is null and a
        // concrete value appears later.
        let old = chain
            .iter()
            .map(|e| &e.old)
            .find(|v| v.is_some())
            .cloned()
            .unwrap_or(None);

        // Net target: the chain's last value, preferring the last concrete
        // one over a trailing null.
        let new = chain
            .iter()
            .rev()
            .map(|e| &e.new)
            .find(|v| v.is_some())
            .cloned()
            .unwrap_or(None);

        if old == new {
            continue;
        }

        let notification_type = chain
            .iter()
            .rev()
            .find_map(|e| e.notification_type)
            .or(event.notification_type);

        out.push(ChangeEvent {
            kind: event.kind,
            old,
            new,
            notification_type,
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::NotificationType;

    fn time_change(old: Option<&str>, new: Option<&str>) -> ChangeEvent {
        ChangeEvent {
            kind: ChangeKind::DepartureTimeChange,
            old: old.map(str::to_string),
            new: new.map(str::to_string),
            notification_type: Some(NotificationType::Delayed),
        }
    }

    fn gate_change(old: &str, new: &str) -> ChangeEvent {
        ChangeEvent {
            kind: ChangeKind::GateChange,
            old: Some(old.to_string()),
            new: Some(new.to_string()),
            notification_type: Some(NotificationType::GateChange),
        }
    }

    #[test]
    fn ping_pong_is_dropped() {
        let events = [
            time_change(Some("2025-07-08T05:30:00Z"), None),
            time_change(None, Some("2025-07-08T05:30:00Z")),
        ];
        assert!(consolidate(&events).is_empty());
    }

    #[test]
    fn net_movement_collapses_to_one_event() {
        let events = [
            time_change(Some("2025-07-08T05:30:00Z"), Some("2025-07-08T06:15:00Z")),
            time_change(Some("2025-07-08T06:15:00Z"), Some("2025-07-08T06:45:00Z")),
        ];
        let out = consolidate(&events);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].old.as_deref(), Some("2025-07-08T05:30:00Z"));
        assert_eq!(out[0].new.as_deref(), Some("2025-07-08T06:45:00Z"));
    }

    #[test]
    fn flap_through_null_keeps_the_real_delay() {
        // 02:30 -> null -> 02:30 -> 03:00 -> 03:00 must come out as a single
        // 02:30 -> 03:00 transition.
        let events = [
            time_change(Some("2025-07-08T05:30:00Z"), None),
            time_change(None, Some("2025-07-08T05:30:00Z")),
            time_change(Some("2025-07-08T05:30:00Z"), Some("2025-07-08T06:00:00Z")),
            time_change(Some("2025-07-08T06:00:00Z"), Some("2025-07-08T06:00:00Z")),
        ];
        let out = consolidate(&events);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].old.as_deref(), Some("2025-07-08T05:30:00Z"));
        assert_eq!(out[0].new.as_deref(), Some("2025-07-08T06:00:00Z"));
    }

    #[test]
    fn trailing_null_loses_to_concrete_value() {
        let events = [
            time_change(Some("2025-07-08T05:30:00Z"), Some("2025-07-08T06:00:00Z")),
            time_change(Some("2025-07-08T06:00:00Z"), None),
        ];
        let out = consolidate(&events);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].new.as_deref(), Some("2025-07-08T06:00:00Z"));
    }

    #[test]
    fn kinds_consolidate_independently() {
        let events = [
            gate_change("D16", "D19"),
            time_change(Some("2025-07-08T05:30:00Z"), Some("2025-07-08T06:00:00Z")),
            gate_change("D19", "D16"),
        ];
        let out = consolidate(&events);
        // The gate ping-pongs away; the delay survives.
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, ChangeKind::DepartureTimeChange);
    }

    #[test]
    fn single_event_passes_through() {
        let events = [gate_change("D16", "D19")];
        let out = consolidate(&events);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], events[0]);
    }
}
