//! Wires the flight-lifecycle services together and owns their lifetimes.
//!
//! One orchestrator exists per process. It builds the clients, repos,
//! dispatcher, poll engine and scheduler from a database pool plus the
//! environment, exposes the trip-created/poll-tick entry points to the HTTP
//! layer, and shuts everything down within a bounded grace window.

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::aeroapi_client::AeroApiClient;
use crate::flight_status_repo::FlightStatusRepository;
use crate::itineraries_repo::ItinerariesRepository;
use crate::notification_retry::NotificationRetryService;
use crate::notifications::NotificationType;
use crate::notifications_repo::NotificationsRepository;
use crate::notifier::NotificationDispatcher;
use crate::polling::{DEFAULT_WORKERS, PollEngine};
use crate::scheduler::EventScheduler;
use crate::trips::Trip;
use crate::trips_repo::TripsRepository;
use crate::twilio_client::TwilioClient;
use crate::web::PgPool;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Orchestrator {
    trips: TripsRepository,
    flight_data: AeroApiClient,
    dispatcher: NotificationDispatcher,
    poll_engine: PollEngine,
    scheduler: EventScheduler,
    retry_service: NotificationRetryService,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Build the full service graph from a pool and the environment.
    pub fn from_env(pool: PgPool) -> Result<Self> {
        let trips = TripsRepository::new(pool.clone());
        let history = FlightStatusRepository::new(pool.clone());
        let notifications = NotificationsRepository::new(pool.clone());
        let itineraries = ItinerariesRepository::new(pool);

        let flight_data = AeroApiClient::from_env()?;
        let twilio = TwilioClient::from_env()?;
        let dispatcher = NotificationDispatcher::new(notifications, twilio.clone());

        let workers = std::env::var("POLL_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_WORKERS);
        let poll_engine = PollEngine::new(
            trips.clone(),
            history.clone(),
            flight_data.clone(),
            dispatcher.clone(),
            workers,
        );

        let tracker = TaskTracker::new();
        let shutdown = CancellationToken::new();
        let scheduler = EventScheduler::new(
            trips.clone(),
            history,
            itineraries,
            dispatcher.clone(),
            poll_engine.clone(),
            tracker.clone(),
            shutdown.clone(),
        );

        let retry_service = NotificationRetryService::new(
            trips.clone(),
            dispatcher.repository().clone(),
            twilio,
        );

        Ok(Self {
            trips,
            flight_data,
            dispatcher,
            poll_engine,
            scheduler,
            retry_service,
            tracker,
            shutdown,
        })
    }

    /// Start the scheduler loops and the notification retry service.
    pub fn start(&self) {
        self.scheduler.start();

        let retry = self.retry_service.clone();
        let shutdown = self.shutdown.clone();
        self.tracker.spawn(async move {
            retry.run(shutdown).await;
        });

        info!("Orchestrator started ({} poll workers)", self.poll_workers());
    }

    fn poll_workers(&self) -> usize {
        std::env::var("POLL_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_WORKERS)
    }

    /// Everything that happens when a trip enters the system: confirmation
    /// message, one-shot jobs, first poll slot. Both the direct create path
    /// and the database webhook land here; the confirmation's idempotency
    /// key turns the second arrival into a no-op.
    pub async fn on_trip_created(&self, trip: &Trip) -> Result<Option<chrono::DateTime<Utc>>> {
        match self
            .dispatcher
            .send(trip, NotificationType::ReservationConfirmation, json!({}))
            .await
        {
            Ok(outcome) => info!(
                "Reservation confirmation for trip {}: {:?}",
                trip.id, outcome
            ),
            // The trip is already persisted; a failed confirmation send is
            // retried by the retry service, never bubbled to the caller.
            Err(e) => error!(
                "Reservation confirmation for trip {} errored: {:#}",
                trip.id, e
            ),
        }

        self.scheduler.schedule_for_trip(trip);

        let next = self.scheduler.arm_polling(trip).await?;
        info!(
            "Trip {} armed for polling (next check {:?})",
            trip.id, next
        );
        Ok(next)
    }

    /// Queue itinerary generation to run immediately in the background.
    pub fn enqueue_itinerary(&self, trip_id: uuid::Uuid) {
        self.scheduler.enqueue_itinerary(trip_id);
    }

    /// Drain all due trips once. The scheduler calls this every tick; the
    /// resync command and tests call it directly.
    pub async fn on_poll_tick(&self) -> Result<usize> {
        self.poll_engine.drain_due(Utc::now()).await
    }

    /// Force one poll cycle for a single trip, ignoring `next_check_at`.
    pub async fn run_poll(&self, trip: Trip) -> Result<()> {
        self.poll_engine.poll_trip(trip).await?;
        Ok(())
    }

    /// Re-plant the trip's one-shot jobs (reminder, boarding, itinerary)
    /// without re-sending the confirmation.
    pub fn schedule_immediate(&self, trip: &Trip) {
        self.scheduler.schedule_for_trip(trip);
    }

    pub fn trips_repository(&self) -> &TripsRepository {
        &self.trips
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    pub fn flight_data(&self) -> &AeroApiClient {
        &self.flight_data
    }

    pub fn scheduled_job_ids(&self) -> Vec<String> {
        self.scheduler.job_ids()
    }

    /// Stop accepting new work and wait for in-flight cycles. Outstanding
    /// work past the grace window is abandoned; the PENDING-first ledger
    /// discipline means nothing user-visible is lost.
    pub async fn shutdown(&self) {
        info!("Orchestrator shutting down");
        self.shutdown.cancel();
        self.tracker.close();

        if tokio::time::timeout(SHUTDOWN_GRACE, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "Shutdown grace window of {:?} elapsed with tasks still running",
                SHUTDOWN_GRACE
            );
        } else {
            info!("All background tasks drained");
        }
    }
}
