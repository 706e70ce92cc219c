use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::orchestrator::Orchestrator;
use crate::polling::calculate_next_check_time;
use crate::web::PgPool;

/// Maintenance sweep: force one poll cycle for every trip inside the
/// tracking window and recompute its `next_check_at`. Used after outages or
/// schema repairs, when stored schedules can no longer be trusted.
pub async fn handle_resync_trips(diesel_pool: PgPool, dry_run: bool) -> Result<()> {
    let orchestrator = Orchestrator::from_env(diesel_pool)?;
    let trips_repo = orchestrator.trips_repository().clone();

    let now = Utc::now();
    let trips = trips_repo.in_tracking_window(now).await?;
    info!(
        "Resync: {} trips in the tracking window{}",
        trips.len(),
        if dry_run { " (dry run)" } else { "" }
    );

    let mut polled = 0usize;
    let mut rescheduled = 0usize;
    for trip in trips {
        let next = calculate_next_check_time(trip.departure_date, now);
        if dry_run {
            info!(
                "Would resync trip {} ({}): next check {:?}",
                trip.id, trip.flight_number, next
            );
            continue;
        }

        let trip_id = trip.id;
        match orchestrator.run_poll(trip).await {
            Ok(()) => polled += 1,
            Err(e) => {
                // The poll cycle already rescheduled on provider trouble;
                // this only catches cycles that aborted outright.
                warn!("Resync poll for trip {} failed: {:#}", trip_id, e);
                trips_repo.update_next_check_at(trip_id, next).await?;
                rescheduled += 1;
            }
        }
    }

    info!(
        "Resync complete: {} trips polled, {} rescheduled without a poll",
        polled, rescheduled
    );
    Ok(())
}
