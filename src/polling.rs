//! Adaptive polling engine.
//!
//! Each trip carries a `next_check_at`; the engine drains due trips with a
//! fixed worker pool and runs one complete poll cycle per trip as an atomic
//! unit: fetch, detect, consolidate, persist history, update the trip row,
//! dispatch, reschedule. A keyed mutex guarantees at most one in-flight
//! cycle per trip.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aeroapi_client::{AeroApiClient, FetchOutcome};
use crate::change_consolidation::consolidate;
use crate::change_detection::{ChangeEvent, detect};
use crate::flight_status::FlightSnapshot;
use crate::flight_status_repo::FlightStatusRepository;
use crate::notifications::NotificationType;
use crate::notifier::{NotificationDispatcher, SendOutcome};
use crate::trips::Trip;
use crate::trips_repo::TripsRepository;

pub const DEFAULT_WORKERS: usize = 8;
/// Ceiling applied to the reschedule after a transient provider failure,
/// in minutes.
const TRANSIENT_RETRY_CAP_MIN: i64 = 10;

/// Where the next poll for a trip should land, from its departure time.
///
/// | window                         | cadence   |
/// |--------------------------------|-----------|
/// | more than 24 h out             | 6 h       |
/// | 4-24 h out                     | 1 h       |
/// | inside 4 h                     | 15 min    |
/// | departed less than 12 h ago    | 30 min    |
/// | departed 12 h ago or more      | stop      |
pub fn calculate_next_check_time(
    departure: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let until_departure = departure - now;

    if until_departure > Duration::hours(24) {
        Some(now + Duration::hours(6))
    } else if until_departure > Duration::hours(4) {
        Some(now + Duration::hours(1))
    } else if until_departure >= Duration::zero() {
        Some(now + Duration::minutes(15))
    } else if now - departure < Duration::hours(12) {
        Some(now + Duration::minutes(30))
    } else {
        None
    }
}

/// Reschedule after a transient provider error: the normal cadence, but
/// never further out than the retry cap.
pub fn next_check_after_transient(
    departure: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let capped = now + Duration::minutes(TRANSIENT_RETRY_CAP_MIN);
    calculate_next_check_time(departure, now).map(|normal| normal.min(capped))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Snapshot processed; count of notifications handed to the dispatcher
    Completed { dispatched: usize },
    /// Another worker already holds this trip's lock
    Skipped,
    /// Provider has no data for the flight-day
    NoData,
    /// Transient provider trouble; rescheduled with the shortened cadence
    TransientError,
    /// Permanent provider rejection; cadence unchanged
    PermanentError,
}

#[derive(Clone)]
pub struct PollEngine {
    trips: TripsRepository,
    history: FlightStatusRepository,
    flight_data: AeroApiClient,
    dispatcher: NotificationDispatcher,
    workers: usize,
    trip_locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
    pending_events: Arc<DashMap<Uuid, Vec<ChangeEvent>>>,
}

impl PollEngine {
    pub fn new(
        trips: TripsRepository,
        history: FlightStatusRepository,
        flight_data: AeroApiClient,
        dispatcher: NotificationDispatcher,
        workers: usize,
    ) -> Self {
        Self {
            trips,
            history,
            flight_data,
            dispatcher,
            workers: workers.max(1),
            trip_locks: Arc::new(DashMap::new()),
            pending_events: Arc::new(DashMap::new()),
        }
    }

    /// Drain all currently due trips through the worker pool. Returns the
    /// number of trips that completed a cycle.
    pub async fn drain_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.trips.due_for_poll(now).await?;
        if due.is_empty() {
            return Ok(0);
        }
        info!("Polling {} due trips", due.len());
        metrics::gauge!("polling.due_trips").set(due.len() as f64);

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut join_set = JoinSet::new();

        for trip in due {
            let engine = self.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                // Semaphore closes only on drop, so acquire errors are
                // unreachable during a drain.
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return CycleOutcome::Skipped;
                };
                let trip_id = trip.id;
                match engine.poll_trip(trip).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("Poll cycle for trip {} aborted: {:#}", trip_id, e);
                        metrics::counter!("polling.cycle_errors").increment(1);
                        CycleOutcome::Skipped
                    }
                }
            });
        }

        let mut completed = 0;
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(CycleOutcome::Skipped) => {}
                Ok(_) => completed += 1,
                Err(e) => error!("Poll worker panicked: {}", e),
            }
        }
        Ok(completed)
    }

    /// Run one complete poll cycle for a trip.
    pub async fn poll_trip(&self, trip: Trip) -> Result<CycleOutcome> {
        let lock = self
            .trip_locks
            .entry(trip.id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let Ok(_guard) = lock.try_lock() else {
            debug!("Trip {} already has a cycle in flight, skipping", trip.id);
            return Ok(CycleOutcome::Skipped);
        };

        let now = Utc::now();
        let outcome = self.run_cycle(&trip, now).await?;
        metrics::counter!("polling.cycles").increment(1);
        Ok(outcome)
    }

    async fn run_cycle(&self, trip: &Trip, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let fetch = match self
            .flight_data
            .get_flight_status(&trip.flight_number, trip.departure_day())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                // Permanent rejection: log, skip this cycle, keep cadence.
                warn!(
                    "Provider rejected {} for trip {}: {:#}",
                    trip.flight_number, trip.id, e
                );
                let next = calculate_next_check_time(trip.departure_date, now);
                self.trips.update_next_check_at(trip.id, next).await?;
                return Ok(CycleOutcome::PermanentError);
            }
        };

        match fetch {
            FetchOutcome::Transient(reason) => {
                debug!(
                    "Transient provider error for trip {}: {}; shortening next check",
                    trip.id, reason
                );
                let next = next_check_after_transient(trip.departure_date, now);
                self.trips.update_next_check_at(trip.id, next).await?;
                Ok(CycleOutcome::TransientError)
            }
            FetchOutcome::NotFound => {
                let next = calculate_next_check_time(trip.departure_date, now);
                self.trips.update_next_check_at(trip.id, next).await?;
                Ok(CycleOutcome::NoData)
            }
            FetchOutcome::Found(snapshot) => {
                let dispatched = self.process_snapshot(trip, &snapshot, now).await?;

                let next = if snapshot.is_terminal() || snapshot.has_landed(now) {
                    None
                } else {
                    calculate_next_check_time(trip.departure_date, now)
                };
                self.trips.update_next_check_at(trip.id, next).await?;
                Ok(CycleOutcome::Completed { dispatched })
            }
        }
    }

    /// Detect, consolidate, persist and dispatch for one fresh snapshot.
    /// History is appended before the trip row is touched so a failure
    /// between the two leaves the invariant intact.
    async fn process_snapshot(
        &self,
        trip: &Trip,
        snapshot: &FlightSnapshot,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let previous = self.history.latest(trip.id).await?;
        let fresh_events = detect(previous.as_ref(), snapshot);

        // Buffer with any events still waiting from earlier ticks (e.g.
        // cooldown-suppressed delays), then take the net view.
        let mut buffered = self
            .pending_events
            .get(&trip.id)
            .map(|e| e.clone())
            .unwrap_or_default();
        buffered.extend(fresh_events);
        let surviving = consolidate(&buffered);

        self.history.append(trip.id, snapshot, now).await?;
        self.trips.update_from_snapshot(trip.id, snapshot).await?;

        let mut dispatched = 0;
        let mut still_pending: Vec<ChangeEvent> = Vec::new();

        for event in surviving {
            let Some(kind) = event.notification_type else {
                info!(
                    "Trip {} {:?} transition recorded without notification",
                    trip.id, event.kind
                );
                continue;
            };

            let extra = event_extra(&event, kind, snapshot);
            match self.dispatcher.send(trip, kind, extra).await? {
                SendOutcome::Sent { .. } => dispatched += 1,
                SendOutcome::AlreadySent => {}
                SendOutcome::CooldownSuppressed => {
                    // Keep the net event around; the next tick may extend it
                    // past the cooldown override threshold.
                    still_pending.push(event);
                }
                SendOutcome::QuietHours => {}
                SendOutcome::Failed { .. } => {
                    // The ledger row is FAILED; the retry service owns it now.
                }
            }
        }

        if still_pending.is_empty() {
            self.pending_events.remove(&trip.id);
        } else {
            self.pending_events.insert(trip.id, still_pending);
        }

        Ok(dispatched)
    }
}

/// Build the dispatcher `extra` payload for a change event. The payload is
/// part of the idempotency key, so it must be derived from the event's net
/// content only.
fn event_extra(event: &ChangeEvent, kind: NotificationType, snapshot: &FlightSnapshot) -> Value {
    match kind {
        // A status change to Delayed and a departure-time change both carry
        // this kind, and their `event.new` differ (label vs timestamp). The
        // snapshot's estimate is the single source for the ETA so both
        // events render the same message and share one idempotency key.
        NotificationType::Delayed => {
            json!({"new_estimated_out": snapshot.estimated_out.map(|t| t.to_rfc3339())})
        }
        NotificationType::GateChange => json!({"new_gate": event.new}),
        NotificationType::Boarding => json!({"gate": snapshot.gate_origin}),
        _ => json!({}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 8, 12, 0, 0).unwrap()
    }

    #[test]
    fn far_future_polls_every_six_hours() {
        let departure = now() + Duration::hours(25);
        assert_eq!(
            calculate_next_check_time(departure, now()),
            Some(now() + Duration::hours(6))
        );
    }

    #[test]
    fn day_of_flight_polls_hourly() {
        let departure = now() + Duration::hours(24);
        assert_eq!(
            calculate_next_check_time(departure, now()),
            Some(now() + Duration::hours(1))
        );
        let departure = now() + Duration::hours(5);
        assert_eq!(
            calculate_next_check_time(departure, now()),
            Some(now() + Duration::hours(1))
        );
    }

    #[test]
    fn final_hours_poll_every_fifteen_minutes() {
        let departure = now() + Duration::hours(4);
        assert_eq!(
            calculate_next_check_time(departure, now()),
            Some(now() + Duration::minutes(15))
        );
        // Exactly at departure still counts as the tight window
        assert_eq!(
            calculate_next_check_time(now(), now()),
            Some(now() + Duration::minutes(15))
        );
    }

    #[test]
    fn in_flight_polls_every_thirty_minutes() {
        let departure = now() - Duration::hours(11);
        assert_eq!(
            calculate_next_check_time(departure, now()),
            Some(now() + Duration::minutes(30))
        );
    }

    #[test]
    fn polling_stops_twelve_hours_after_departure() {
        let departure = now() - Duration::hours(12);
        assert_eq!(calculate_next_check_time(departure, now()), None);
        let departure = now() - Duration::hours(13);
        assert_eq!(calculate_next_check_time(departure, now()), None);
    }

    #[test]
    fn delayed_extra_comes_from_the_snapshot_for_both_event_kinds() {
        let estimate = Utc.with_ymd_and_hms(2025, 7, 8, 3, 0, 0).unwrap();
        let snapshot = FlightSnapshot {
            ident: "AV112".to_string(),
            status: "Delayed".to_string(),
            estimated_out: Some(estimate),
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
        };

        // A Scheduled -> Delayed poll emits a status event (new = label) and
        // a time event (new = timestamp); both must render the same ETA.
        let status_event = ChangeEvent {
            kind: crate::change_detection::ChangeKind::StatusChange,
            old: Some("Scheduled".to_string()),
            new: Some("Delayed".to_string()),
            notification_type: Some(NotificationType::Delayed),
        };
        let time_event = ChangeEvent {
            kind: crate::change_detection::ChangeKind::DepartureTimeChange,
            old: Some("2025-07-08T02:30:00+00:00".to_string()),
            new: Some(estimate.to_rfc3339()),
            notification_type: Some(NotificationType::Delayed),
        };

        let from_status = event_extra(&status_event, NotificationType::Delayed, &snapshot);
        let from_time = event_extra(&time_event, NotificationType::Delayed, &snapshot);
        assert_eq!(from_status, from_time);
        assert_eq!(
            from_status["new_estimated_out"].as_str(),
            Some("2025-07-08T03:00:00+00:00")
        );
    }

    #[test]
    fn transient_error_caps_the_wait_at_ten_minutes() {
        // Far-future trip would normally wait 6 h
        let departure = now() + Duration::hours(48);
        assert_eq!(
            next_check_after_transient(departure, now()),
            Some(now() + Duration::minutes(10))
        );
        // Inside 4 h the cap still wins over the 15-min cadence
        let departure = now() + Duration::hours(2);
        assert_eq!(
            next_check_after_transient(departure, now()),
            Some(now() + Duration::minutes(10))
        );
        // Past the stop point stays stopped even on errors
        let departure = now() - Duration::hours(13);
        assert_eq!(next_check_after_transient(departure, now()), None);
    }
}
