//! Background retry of failed notification sends.
//!
//! Distinct from the provider-call retrier inside `aeroapi_client`: this one
//! is wide and persistent. State lives in `notifications_log`, so retries
//! survive restarts, and the idempotency key keeps a retried send from ever
//! duplicating a delivered one.

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::notifications_repo::{NotificationsRepository, retry_due_at};
use crate::trips_repo::TripsRepository;
use crate::twilio_client::TwilioClient;

const MAX_ATTEMPTS: i32 = 5;
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct NotificationRetryService {
    trips: TripsRepository,
    notifications: NotificationsRepository,
    twilio: TwilioClient,
}

impl NotificationRetryService {
    pub fn new(
        trips: TripsRepository,
        notifications: NotificationsRepository,
        twilio: TwilioClient,
    ) -> Self {
        Self {
            trips,
            notifications,
            twilio,
        }
    }

    /// Run the sweep loop until shutdown.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("Notification retry service started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Notification retry service stopping");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!("Notification retry sweep failed: {}", e);
                    }
                }
            }
        }
    }

    /// One pass over FAILED rows that are due for another attempt.
    pub async fn sweep(&self) -> Result<usize> {
        let now = Utc::now();
        let rows = self.notifications.failed_for_retry(MAX_ATTEMPTS).await?;
        let mut retried = 0;

        for row in rows {
            if now < retry_due_at(row.updated_at, row.retry_count) {
                continue;
            }

            let Some(kind) = row.notification_type() else {
                warn!(
                    "Skipping retry of notification {} with unknown type {}",
                    row.id, row.notification_type
                );
                continue;
            };

            let Some(trip) = self.trips.get_by_id(row.trip_id).await? else {
                warn!("Skipping retry for missing trip {}", row.trip_id);
                continue;
            };

            self.notifications.begin_retry(row.id).await?;

            let extra = row.extra_data.clone().unwrap_or(Value::Null);
            let variables = crate::notifier::render_variables(&trip, kind, &extra);
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
                        "Retry delivered {} for trip {} (attempt {})",
                        kind,
                        trip.id,
                        row.retry_count + 1
                    );
                    metrics::counter!("notifications.retry.delivered").increment(1);
                }
                Err(e) => {
                    let error = e.to_string();
                    debug!(
                        "Retry of {} for trip {} failed (attempt {}): {}",
                        kind,
                        trip.id,
                        row.retry_count + 1,
                        error
                    );
                    self.notifications.mark_failed(row.id, &error).await?;
                    metrics::counter!("notifications.retry.failed").increment(1);
                }
            }
            retried += 1;
        }

        if retried > 0 {
            info!("Notification retry sweep attempted {} sends", retried);
        }
        Ok(retried)
    }
}
