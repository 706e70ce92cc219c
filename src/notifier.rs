//! Idempotent notification dispatch.
//!
//! Every send is gated by the `notifications_log` ledger: the idempotency
//! key is computed from the canonical JSON of the logical notification, a
//! PENDING row is inserted before the provider call, and the row flips to
//! SENT or FAILED afterward. A crash between the insert and the provider
//! response leaves a PENDING row that the retry service picks up, so the
//! passenger sees each logical notification at most once.

use anyhow::Result;
use chrono::{DateTime, Duration, Timelike, Utc};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::notifications::{
    DeliveryStatus, NewNotificationLogRow, NotificationType,
};
use crate::notifications_repo::{InsertOutcome, NotificationsRepository};
use crate::timezones;
use crate::trips::Trip;
use crate::twilio_client::TwilioClient;

/// Minimum spacing between two DELAYED sends for the same trip, unless the
/// estimate itself moved materially.
const DELAYED_COOLDOWN_MIN: i64 = 15;
/// Estimate movement that overrides the cooldown, in minutes.
const DELAYED_COOLDOWN_OVERRIDE_MIN: i64 = 15;

/// Quiet hours for REMINDER_24H, in origin-airport local time.
const QUIET_HOURS_START: u32 = 22;
const QUIET_HOURS_END: u32 = 8;

pub const FALLBACK_GATE: &str = "Ver pantallas del aeropuerto";
pub const FALLBACK_HOTEL: &str = "tu alojamiento reservado";
const FALLBACK_WEATHER: &str = "buen clima para volar";
const FALLBACK_EXTRA_INFO: &str = "¡Buen viaje!";

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Sent { message_sid: String },
    /// A SENT row with this idempotency key already exists
    AlreadySent,
    /// DELAYED send refused because one went out within the cooldown and
    /// the estimate has not materially moved
    CooldownSuppressed,
    /// REMINDER_24H withheld during passenger-local quiet hours
    QuietHours,
    /// Provider send failed; the row stays FAILED for the retry service
    Failed { error: String },
}

/// First 16 hex chars of the SHA-256 over the canonical sorted-key JSON of
/// the logical notification. Stable across restarts and key order.
pub fn idempotency_key(trip_id: uuid::Uuid, kind: NotificationType, extra: &Value) -> String {
    // serde_json maps are BTree-backed, so nested keys serialize sorted.
    let canonical = json!({
        "trip_id": trip_id.to_string(),
        "notification_type": kind.as_str(),
        "extra_data": extra,
    });
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    hex::encode(digest)[..16].to_string()
}

fn extra_str<'a>(extra: &'a Value, key: &str) -> Option<&'a str> {
    extra.get(key).and_then(Value::as_str)
}

/// Build the positional template variables ("1"-indexed) for a message kind.
pub fn render_variables(
    trip: &Trip,
    kind: NotificationType,
    extra: &Value,
) -> BTreeMap<String, String> {
    let positional: Vec<String> = match kind {
        NotificationType::ReservationConfirmation => vec![
            trip.client_name.clone(),
            trip.flight_number.clone(),
            trip.origin_iata.clone(),
            trip.destination_iata.clone(),
            timezones::format_departure_human(trip.departure_date, &trip.origin_iata),
        ],
        NotificationType::Reminder24h => vec![
            trip.client_name.clone(),
            trip.origin_iata.clone(),
            timezones::format_departure_human(trip.departure_date, &trip.origin_iata),
            extra_str(extra, "weather_info")
                .unwrap_or(FALLBACK_WEATHER)
                .to_string(),
            trip.destination_iata.clone(),
            extra_str(extra, "additional_info")
                .unwrap_or(FALLBACK_EXTRA_INFO)
                .to_string(),
        ],
        NotificationType::Delayed => {
            let new_departure = extra_str(extra, "new_estimated_out")
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| timezones::format_eta_local(t.with_timezone(&Utc), &trip.origin_iata))
                .unwrap_or_else(|| "por confirmar".to_string());
            vec![
                trip.client_name.clone(),
                trip.flight_number.clone(),
                new_departure,
            ]
        }
        NotificationType::GateChange => vec![
            trip.client_name.clone(),
            trip.flight_number.clone(),
            extra_str(extra, "new_gate")
                .map(str::to_string)
                .or_else(|| trip.gate.clone())
                .unwrap_or_else(|| FALLBACK_GATE.to_string()),
        ],
        NotificationType::Cancelled => {
            vec![trip.client_name.clone(), trip.flight_number.clone()]
        }
        NotificationType::Boarding => vec![
            trip.flight_number.clone(),
            extra_str(extra, "gate")
                .map(str::to_string)
                .or_else(|| trip.gate.clone())
                .unwrap_or_else(|| FALLBACK_GATE.to_string()),
        ],
        NotificationType::LandingWelcome => vec![
            trip.client_name.clone(),
            extra_str(extra, "destination_city")
                .unwrap_or(&trip.destination_iata)
                .to_string(),
            extra_str(extra, "hotel_address")
                .unwrap_or(FALLBACK_HOTEL)
                .to_string(),
        ],
        NotificationType::ItineraryReady => vec![
            trip.client_name.clone(),
            trip.destination_iata.clone(),
        ],
    };

    positional
        .into_iter()
        .enumerate()
        .map(|(i, v)| ((i + 1).to_string(), v))
        .collect()
}

/// Pure cooldown decision for DELAYED sends: suppress when the previous
/// DELAYED went out less than 15 minutes ago, unless the estimate moved at
/// least 15 minutes from the one last sent (no comparable estimates means
/// the cooldown stands).
pub fn delayed_cooldown_applies(
    last_sent_at: DateTime<Utc>,
    previous_eta: Option<DateTime<Utc>>,
    new_eta: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    if now - last_sent_at >= Duration::minutes(DELAYED_COOLDOWN_MIN) {
        return false;
    }
    match (previous_eta, new_eta) {
        (Some(previous), Some(new)) => {
            let moved = if new >= previous {
                new - previous
            } else {
                previous - new
            };
            moved < Duration::minutes(DELAYED_COOLDOWN_OVERRIDE_MIN)
        }
        _ => true,
    }
}

/// Whether `now` falls in the passenger's quiet window (22:00-08:00 at the
/// origin airport). Applies to REMINDER_24H only.
pub fn in_quiet_hours(trip: &Trip, now: DateTime<Utc>) -> bool {
    let local_hour = timezones::utc_to_local(now, &trip.origin_iata).hour();
    local_hour >= QUIET_HOURS_START || local_hour < QUIET_HOURS_END
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    notifications: NotificationsRepository,
    twilio: TwilioClient,
}

impl NotificationDispatcher {
    pub fn new(notifications: NotificationsRepository, twilio: TwilioClient) -> Self {
        Self {
            notifications,
            twilio,
        }
    }

    pub fn repository(&self) -> &NotificationsRepository {
        &self.notifications
    }

    /// Send one logical notification, exactly once per idempotency key.
    pub async fn send(
        &self,
        trip: &Trip,
        kind: NotificationType,
        extra: Value,
    ) -> Result<SendOutcome> {
        let key = idempotency_key(trip.id, kind, &extra);

        if let Some(existing) = self
            .notifications
            .find_by_idempotency_key(trip.id, &key)
            .await?
            && existing.delivery_status == DeliveryStatus::Sent
        {
            info!(
                "Notification {} already sent for trip {} (key {})",
                kind, trip.id, key
            );
            metrics::counter!("notifications.duplicate_suppressed").increment(1);
            return Ok(SendOutcome::AlreadySent);
        }

        let now = Utc::now();

        if kind == NotificationType::Delayed
            && self.delayed_in_cooldown(trip, &extra, now).await?
        {
            info!("DELAYED send for trip {} suppressed by cooldown", trip.id);
            metrics::counter!("notifications.cooldown_suppressed").increment(1);
            return Ok(SendOutcome::CooldownSuppressed);
        }

        if kind == NotificationType::Reminder24h && in_quiet_hours(trip, now) {
            info!(
                "REMINDER_24H for trip {} withheld during quiet hours",
                trip.id
            );
            return Ok(SendOutcome::QuietHours);
        }

        let variables = render_variables(trip, kind, &extra);

        // Ledger row goes in PENDING before any provider traffic.
        let row = match self
            .notifications
            .insert_pending(NewNotificationLogRow {
                trip_id: trip.id,
                notification_type: kind.as_str().to_string(),
                template_name: kind.template_name().to_string(),
                delivery_status: DeliveryStatus::Pending,
                idempotency_key: key.clone(),
                extra_data: Some(extra),
                created_at: now,
                updated_at: now,
            })
            .await?
        {
            InsertOutcome::Inserted(row) => row,
            InsertOutcome::AlreadyLogged(row) => {
                if row.delivery_status == DeliveryStatus::Sent {
                    return Ok(SendOutcome::AlreadySent);
                }
                row
            }
        };

        let content_sid = std::env::var(kind.content_sid_env())
            .unwrap_or_else(|_| kind.template_name().to_string());

        match self
            .twilio
            .send_template(&trip.whatsapp, &content_sid, &variables)
            .await
        {
            Ok(message_sid) => {
                self.notifications.mark_sent(row.id, &message_sid).await?;
                info!(
                    "Sent {} to trip {} ({} -> {})",
                    kind, trip.id, trip.origin_iata, trip.destination_iata
                );
                Ok(SendOutcome::Sent { message_sid })
            }
            Err(e) => {
                let error = e.to_string();
                warn!("Send of {} for trip {} failed: {}", kind, trip.id, error);
                self.notifications.mark_failed(row.id, &error).await?;
                Ok(SendOutcome::Failed { error })
            }
        }
    }

    /// DELAYED cooldown: refuse when a DELAYED went out within the last 15
    /// minutes, unless the new estimate moved at least 15 minutes from the
    /// one last sent.
    async fn delayed_in_cooldown(
        &self,
        trip: &Trip,
        extra: &Value,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(last) = self
            .notifications
            .last_sent(trip.id, NotificationType::Delayed)
            .await?
        else {
            return Ok(false);
        };
        let Some(sent_at) = last.sent_at else {
            return Ok(false);
        };

        let parse_eta = |v: Option<&Value>| -> Option<DateTime<Utc>> {
            v.and_then(|e| e.get("new_estimated_out"))
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc))
        };

        let previous_eta = parse_eta(last.extra_data.as_ref());
        let new_eta = parse_eta(Some(extra));
        Ok(delayed_cooldown_applies(sent_at, previous_eta, new_eta, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn trip() -> Trip {
        Trip {
            id: Uuid::parse_str("8a570d1b-f2af-458c-8dbc-3ad58eeb547f").unwrap(),
            client_name: "Vale Ulloa".to_string(),
            whatsapp: "+5491140383422".to_string(),
            flight_number: "AV112".to_string(),
            origin_iata: "EZE".to_string(),
            destination_iata: "MDE".to_string(),
            departure_date: Utc.with_ymd_and_hms(2025, 7, 8, 17, 30, 0).unwrap(),
            status: "SCHEDULED".to_string(),
            gate: None,
            estimated_arrival: None,
            client_description: None,
            agency_id: None,
            metadata: None,
            inserted_at: Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap(),
            next_check_at: None,
        }
    }

    #[test]
    fn idempotency_key_is_16_hex() {
        let key = idempotency_key(trip().id, NotificationType::Boarding, &json!({}));
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn idempotency_key_ignores_extra_key_order() {
        let a = json!({"gate": "A12", "weather_info": "soleado"});
        let b = json!({"weather_info": "soleado", "gate": "A12"});
        assert_eq!(
            idempotency_key(trip().id, NotificationType::Boarding, &a),
            idempotency_key(trip().id, NotificationType::Boarding, &b),
        );
    }

    #[test]
    fn idempotency_key_distinguishes_type_and_content() {
        let base = idempotency_key(trip().id, NotificationType::Boarding, &json!({}));
        assert_ne!(
            base,
            idempotency_key(trip().id, NotificationType::Cancelled, &json!({}))
        );
        assert_ne!(
            base,
            idempotency_key(trip().id, NotificationType::Boarding, &json!({"gate": "B2"}))
        );
    }

    #[test]
    fn confirmation_variables_are_positional() {
        let vars = render_variables(
            &trip(),
            NotificationType::ReservationConfirmation,
            &json!({}),
        );
        assert_eq!(vars["1"], "Vale Ulloa");
        assert_eq!(vars["2"], "AV112");
        assert_eq!(vars["3"], "EZE");
        assert_eq!(vars["4"], "MDE");
        // 17:30Z at EZE (UTC-3) is 14:30 local
        assert_eq!(vars["5"], "08/07/2025 14:30");
    }

    #[test]
    fn reminder_variables_use_fallbacks() {
        let vars = render_variables(&trip(), NotificationType::Reminder24h, &json!({}));
        assert_eq!(vars["4"], FALLBACK_WEATHER);
        assert_eq!(vars["6"], FALLBACK_EXTRA_INFO);

        let vars = render_variables(
            &trip(),
            NotificationType::Reminder24h,
            &json!({"weather_info": "soleado 18°C"}),
        );
        assert_eq!(vars["4"], "soleado 18°C");
    }

    #[test]
    fn delayed_variables_format_the_new_estimate() {
        let vars = render_variables(
            &trip(),
            NotificationType::Delayed,
            &json!({"new_estimated_out": "2025-07-08T03:00:00Z"}),
        );
        assert_eq!(vars["3"], "00:00 (03:00 EZE)");

        let vars = render_variables(&trip(), NotificationType::Delayed, &json!({}));
        assert_eq!(vars["3"], "por confirmar");
    }

    #[test]
    fn boarding_gate_falls_back_to_screens() {
        let vars = render_variables(&trip(), NotificationType::Boarding, &json!({}));
        assert_eq!(vars["1"], "AV112");
        assert_eq!(vars["2"], FALLBACK_GATE);

        let mut with_gate = trip();
        with_gate.gate = Some("A12".to_string());
        let vars = render_variables(&with_gate, NotificationType::Boarding, &json!({}));
        assert_eq!(vars["2"], "A12");
    }

    #[test]
    fn landing_welcome_uses_hotel_metadata_or_default() {
        let vars = render_variables(&trip(), NotificationType::LandingWelcome, &json!({}));
        assert_eq!(vars["3"], FALLBACK_HOTEL);

        let vars = render_variables(
            &trip(),
            NotificationType::LandingWelcome,
            &json!({"destination_city": "Medellín", "hotel_address": "Hotel Dann Carlton"}),
        );
        assert_eq!(vars["2"], "Medellín");
        assert_eq!(vars["3"], "Hotel Dann Carlton");
    }

    #[test]
    fn delayed_cooldown_boundaries() {
        let sent = Utc.with_ymd_and_hms(2025, 7, 8, 12, 0, 0).unwrap();
        let eta = Utc.with_ymd_and_hms(2025, 7, 8, 3, 0, 0).unwrap();

        // 14 minutes later with an identical estimate: suppressed
        let now = sent + Duration::minutes(14);
        assert!(delayed_cooldown_applies(sent, Some(eta), Some(eta), now));

        // Same spacing but the estimate moved 15 minutes: sent
        assert!(!delayed_cooldown_applies(
            sent,
            Some(eta),
            Some(eta + Duration::minutes(15)),
            now
        ));

        // A 14-minute move is not material enough
        assert!(delayed_cooldown_applies(
            sent,
            Some(eta),
            Some(eta + Duration::minutes(14)),
            now
        ));

        // Past the cooldown window anything goes out
        let now = sent + Duration::minutes(15);
        assert!(!delayed_cooldown_applies(sent, Some(eta), Some(eta), now));

        // Unparseable estimates keep the cooldown in force
        let now = sent + Duration::minutes(5);
        assert!(delayed_cooldown_applies(sent, None, Some(eta), now));
    }

    #[test]
    fn quiet_hours_cover_late_night_at_origin() {
        let t = trip();
        // 01:30Z is 22:30 the previous evening at EZE: quiet
        assert!(in_quiet_hours(
            &t,
            Utc.with_ymd_and_hms(2025, 7, 8, 1, 30, 0).unwrap()
        ));
        // 12:00Z is 09:00 local: allowed
        assert!(!in_quiet_hours(
            &t,
            Utc.with_ymd_and_hms(2025, 7, 8, 12, 0, 0).unwrap()
        ));
        // Exactly 22:00 local starts the quiet window
        assert!(in_quiet_hours(
            &t,
            Utc.with_ymd_and_hms(2025, 7, 9, 1, 0, 0).unwrap()
        ));
        // Exactly 08:00 local ends it
        assert!(!in_quiet_hours(
            &t,
            Utc.with_ymd_and_hms(2025, 7, 8, 11, 0, 0).unwrap()
        ));
    }
}
