//! Time-driven jobs: polling ticks, reminder/boarding/landing sweeps, and
//! per-trip one-shot jobs planted at trip creation.
//!
//! Interval jobs run as long-lived tasks on a shared `TaskTracker`; one-shot
//! jobs are keyed by a stable id with replace-existing semantics, so
//! re-planting a trip's jobs (webhook plus direct create) never doubles
//! them. Every loop survives job errors: failures are logged and the tick
//! cadence continues.

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::flight_status_repo::FlightStatusRepository;
use crate::itineraries_repo::ItinerariesRepository;
use crate::notifications::NotificationType;
use crate::notifier::NotificationDispatcher;
use crate::polling::{PollEngine, calculate_next_check_time};
use crate::trips::Trip;
use crate::trips_repo::TripsRepository;

const POLL_TICK: Duration = Duration::from_secs(60);
const REMINDER_SWEEP: Duration = Duration::from_secs(60 * 60);
const BOARDING_SWEEP: Duration = Duration::from_secs(5 * 60);
const LANDING_SWEEP: Duration = Duration::from_secs(30 * 60);

/// Boarding call lead time before departure, in minutes.
const BOARDING_LEAD_MIN: i64 = 40;

/// Delay before generating the itinerary for a freshly created trip.
/// Last-minute bookings get theirs almost immediately; far-out bookings can
/// wait for a calmer moment.
pub fn itinerary_delay(time_to_departure: ChronoDuration) -> ChronoDuration {
    if time_to_departure > ChronoDuration::days(30) {
        ChronoDuration::hours(2)
    } else if time_to_departure >= ChronoDuration::days(7) {
        ChronoDuration::hours(1)
    } else if time_to_departure >= ChronoDuration::hours(24) {
        ChronoDuration::minutes(30)
    } else {
        ChronoDuration::minutes(5)
    }
}

#[derive(Clone)]
pub struct EventScheduler {
    trips: TripsRepository,
    history: FlightStatusRepository,
    itineraries: ItinerariesRepository,
    dispatcher: NotificationDispatcher,
    poll_engine: PollEngine,
    one_shot_jobs: Arc<DashMap<String, JoinHandle<()>>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl EventScheduler {
    pub fn new(
        trips: TripsRepository,
        history: FlightStatusRepository,
        itineraries: ItinerariesRepository,
        dispatcher: NotificationDispatcher,
        poll_engine: PollEngine,
        tracker: TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            trips,
            history,
            itineraries,
            dispatcher,
            poll_engine,
            one_shot_jobs: Arc::new(DashMap::new()),
            tracker,
            shutdown,
        }
    }

    /// Spawn all interval loops. Called once at startup.
    pub fn start(&self) {
        self.spawn_interval("poll_tick", POLL_TICK, |s| async move {
            s.poll_tick().await
        });
        self.spawn_interval("24h_reminder_sweep", REMINDER_SWEEP, |s| async move {
            s.reminder_sweep().await
        });
        self.spawn_interval("boarding_window", BOARDING_SWEEP, |s| async move {
            s.boarding_sweep().await
        });
        self.spawn_interval("landing_welcome", LANDING_SWEEP, |s| async move {
            s.landing_sweep().await
        });
        info!("Event scheduler started (4 interval jobs)");
    }

    fn spawn_interval<F, Fut>(&self, name: &'static str, period: Duration, job: F)
    where
        F: Fn(EventScheduler) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let scheduler = self.clone();
        let shutdown = self.shutdown.clone();
        self.tracker.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Scheduler job {} stopping", name);
                        return;
                    }
                    _ = interval.tick() => {
                        let started = std::time::Instant::now();
                        if let Err(e) = job(scheduler.clone()).await {
                            // The scheduler loop must never die; log and keep ticking.
                            error!("Scheduler job {} failed: {:#}", name, e);
                            metrics::counter!("scheduler.job_errors", "job" => name).increment(1);
                        }
                        metrics::histogram!("scheduler.job_duration_ms", "job" => name)
                            .record(started.elapsed().as_secs_f64() * 1000.0);
                    }
                }
            }
        });
    }

    /// Plant the one-shot jobs for a freshly created trip.
    pub fn schedule_for_trip(&self, trip: &Trip) {
        let now = Utc::now();
        let time_to_departure = trip.departure_date - now;

        // Last-minute bookings get their reminder right away instead of
        // waiting for the hourly sweep. Same helper as the sweep, so both
        // paths share one idempotency key and the ledger dedupes them.
        if time_to_departure <= ChronoDuration::hours(24) {
            let scheduler = self.clone();
            let reminder_trip = trip.clone();
            self.plant_one_shot(
                format!("immediate_reminder_{}", trip.id),
                Duration::from_secs(60),
                async move {
                    if let Err(e) = scheduler.send_reminder(&reminder_trip).await {
                        error!(
                            "Immediate reminder for trip {} failed: {:#}",
                            reminder_trip.id, e
                        );
                    }
                },
            );
        }

        let boarding_at = trip.departure_date - ChronoDuration::minutes(BOARDING_LEAD_MIN);
        if boarding_at > now {
            let scheduler = self.clone();
            let boarding_trip = trip.clone();
            let delay = (boarding_at - now).to_std().unwrap_or(Duration::ZERO);
            self.plant_one_shot(format!("boarding_{}", trip.id), delay, async move {
                if let Err(e) = scheduler.send_boarding(&boarding_trip).await {
                    error!(
                        "Boarding notification for trip {} failed: {:#}",
                        boarding_trip.id, e
                    );
                }
            });
        }

        let itinerary_after = itinerary_delay(time_to_departure)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let scheduler = self.clone();
        let itinerary_trip_id = trip.id;
        self.plant_one_shot(
            format!("itinerary_{}", trip.id),
            itinerary_after,
            async move {
                if let Err(e) = scheduler.generate_itinerary(itinerary_trip_id).await {
                    error!(
                        "Itinerary generation for trip {} failed: {:#}",
                        itinerary_trip_id, e
                    );
                }
            },
        );

        info!(
            "Planted one-shot jobs for trip {} (departure in {} min)",
            trip.id,
            time_to_departure.num_minutes()
        );
    }

    /// Schedule a job to run once after `delay`, replacing any job already
    /// registered under the same id.
    fn plant_one_shot<Fut>(&self, job_id: String, delay: Duration, job: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        let handle = self.tracker.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    job.await;
                }
            }
        });

        if let Some(previous) = self.one_shot_jobs.insert(job_id.clone(), handle) {
            debug!("Replacing scheduled job {}", job_id);
            previous.abort();
        }
    }

    async fn poll_tick(&self) -> Result<()> {
        self.poll_engine.drain_due(Utc::now()).await?;
        Ok(())
    }

    /// Hourly: remind passengers departing 23-25 hours from now, once.
    async fn reminder_sweep(&self) -> Result<()> {
        let now = Utc::now();
        let trips = self
            .trips
            .departing_between(now + ChronoDuration::hours(23), now + ChronoDuration::hours(25))
            .await?;

        for trip in trips {
            if let Err(e) = self.send_reminder(&trip).await {
                warn!("Reminder for trip {} failed: {:#}", trip.id, e);
            }
        }
        Ok(())
    }

    async fn send_reminder(&self, trip: &Trip) -> Result<()> {
        if self
            .dispatcher
            .repository()
            .has_sent(trip.id, NotificationType::Reminder24h)
            .await?
        {
            return Ok(());
        }
        let outcome = self
            .dispatcher
            .send(trip, NotificationType::Reminder24h, json!({}))
            .await?;
        debug!("Reminder for trip {}: {:?}", trip.id, outcome);
        Ok(())
    }

    /// Every 5 minutes: boarding call for departures 35-45 minutes out.
    /// Backstop for trips created after their boarding one-shot would have
    /// fired, and for restarts that dropped in-memory jobs.
    async fn boarding_sweep(&self) -> Result<()> {
        let now = Utc::now();
        let trips = self
            .trips
            .departing_between(
                now + ChronoDuration::minutes(35),
                now + ChronoDuration::minutes(45),
            )
            .await?;

        for trip in trips {
            if let Err(e) = self.send_boarding(&trip).await {
                warn!("Boarding call for trip {} failed: {:#}", trip.id, e);
            }
        }
        Ok(())
    }

    async fn send_boarding(&self, trip: &Trip) -> Result<()> {
        if self
            .dispatcher
            .repository()
            .has_sent(trip.id, NotificationType::Boarding)
            .await?
        {
            return Ok(());
        }
        self.dispatcher
            .send(trip, NotificationType::Boarding, json!({}))
            .await?;
        Ok(())
    }

    /// Every 30 minutes: welcome passengers whose latest snapshot indicates
    /// they have landed, and stop polling those trips.
    async fn landing_sweep(&self) -> Result<()> {
        let now = Utc::now();
        // Landed flights departed in the past; the 2-day lookback matches
        // the polling window.
        let trips = self
            .trips
            .departing_between(now - ChronoDuration::days(2), now)
            .await?;

        for trip in trips {
            let Some(snapshot) = self.history.latest(trip.id).await? else {
                continue;
            };
            if !snapshot.has_landed(now) {
                continue;
            }
            if self
                .dispatcher
                .repository()
                .has_sent(trip.id, NotificationType::LandingWelcome)
                .await?
            {
                continue;
            }

            let hotel_address = trip
                .metadata
                .as_ref()
                .and_then(|m| m.get("hotel_address"))
                .and_then(|v| v.as_str());
            let extra = match hotel_address {
                Some(address) => json!({"hotel_address": address}),
                None => json!({}),
            };

            let outcome = self
                .dispatcher
                .send(&trip, NotificationType::LandingWelcome, extra)
                .await?;
            debug!("Landing welcome for trip {}: {:?}", trip.id, outcome);

            // Landed means done: stop the polling loop in the same sweep.
            self.trips.update_next_check_at(trip.id, None).await?;
        }
        Ok(())
    }

    /// Black-box itinerary generation: persist a draft for the trip and
    /// announce it. The draft body is a skeleton the external generator
    /// fills in; its content is irrelevant to the lifecycle engine.
    async fn generate_itinerary(&self, trip_id: uuid::Uuid) -> Result<()> {
        let Some(trip) = self.trips.get_by_id(trip_id).await? else {
            warn!("Itinerary job for unknown trip {}", trip_id);
            return Ok(());
        };

        let parsed = json!({
            "destination": trip.destination_iata,
            "origin": trip.origin_iata,
            "departure_date": trip.departure_date,
            "preferences": trip.client_description,
            "days": [],
        });
        self.itineraries
            .create_draft(trip.id, parsed, None, None)
            .await?;

        self.dispatcher
            .send(&trip, NotificationType::ItineraryReady, json!({}))
            .await?;
        Ok(())
    }

    /// Queue itinerary generation to run right away, replacing any pending
    /// generation job for the trip.
    pub fn enqueue_itinerary(&self, trip_id: uuid::Uuid) {
        let scheduler = self.clone();
        self.plant_one_shot(format!("itinerary_{}", trip_id), Duration::ZERO, async move {
            if let Err(e) = scheduler.generate_itinerary(trip_id).await {
                error!("Itinerary generation for trip {} failed: {:#}", trip_id, e);
            }
        });
    }

    /// Compute and persist the first `next_check_at` for a new trip.
    pub async fn arm_polling(&self, trip: &Trip) -> Result<Option<DateTime<Utc>>> {
        let next = calculate_next_check_time(trip.departure_date, Utc::now());
        self.trips.update_next_check_at(trip.id, next).await?;
        Ok(next)
    }

    /// Snapshot of registered one-shot jobs for the status endpoint.
    pub fn job_ids(&self) -> Vec<String> {
        self.one_shot_jobs
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn itinerary_delay_scales_with_lead_time() {
        assert_eq!(
            itinerary_delay(ChronoDuration::hours(2)),
            ChronoDuration::minutes(5)
        );
        assert_eq!(
            itinerary_delay(ChronoDuration::days(3)),
            ChronoDuration::minutes(30)
        );
        assert_eq!(
            itinerary_delay(ChronoDuration::days(10)),
            ChronoDuration::hours(1)
        );
        assert_eq!(
            itinerary_delay(ChronoDuration::days(45)),
            ChronoDuration::hours(2)
        );
    }

    #[test]
    fn itinerary_delay_boundaries() {
        // Exactly 24 h counts as the 1-7 day band
        assert_eq!(
            itinerary_delay(ChronoDuration::hours(24)),
            ChronoDuration::minutes(30)
        );
        // Exactly 7 days counts as the 7-30 day band
        assert_eq!(
            itinerary_delay(ChronoDuration::days(7)),
            ChronoDuration::hours(1)
        );
        // Exactly 30 days stays in the 7-30 day band
        assert_eq!(
            itinerary_delay(ChronoDuration::days(30)),
            ChronoDuration::hours(1)
        );
    }
}
